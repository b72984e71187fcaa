use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ui_pilot::config::VerifySettings;
use ui_pilot::plan::preview;
use ui_pilot::verify::{ExecutionTrace, OutcomeVerifier};

fn long_trace() -> ExecutionTrace {
    let mut trace = ExecutionTrace::new();
    for i in 1..=50 {
        trace.record_step(i, &format!("点击第{}个菜单项", i), None, Some("操作成功"), i % 7 != 0);
        trace.record_page(Some(&format!("页面 {}", i)), Some("https://x.test/app"));
    }
    trace
}

fn benchmark_verify(c: &mut Criterion) {
    let verifier = OutcomeVerifier::new(VerifySettings::defaults());
    let trace = long_trace();
    let expected = vec![
        "登录成功并跳转到首页".to_string(),
        "页面 42".to_string(),
        "the report is exported as csv".to_string(),
    ];

    c.bench_function("verify_expected_results", |b| {
        b.iter(|| verifier.verify(black_box(&expected), black_box(&trace)))
    });
}

fn benchmark_plan_preview(c: &mut Criterion) {
    let plan: String = (1..=40)
        .map(|i| format!("{}. 点击按钮{}\n", i, i))
        .chain(std::iter::once("预期结果:\n- 全部完成\n".to_string()))
        .collect();

    c.bench_function("plan_preview", |b| {
        b.iter(|| {
            let result = preview(black_box(&plan), 50);
            assert!(result.is_ok());
        })
    });
}

criterion_group!(benches, benchmark_verify, benchmark_plan_preview);
criterion_main!(benches);
