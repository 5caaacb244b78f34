use analysis_sandbox::plot::open_figures;
use analysis_sandbox::{
    Dataset, ErrorKind, ExecutionSandbox, LineageSource, ResolvedValue, SandboxConfig, ValueKind,
};
use polars::prelude::*;
use serde_json::json;
use std::time::Duration;

fn sales() -> Dataset {
    let df = df! [
        "date" => ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04"],
        "region" => ["East", "West", "East", "North"],
        "sales" => [100i64, 400, 100, 50]
    ]
    .unwrap();
    Dataset::new(df)
}

#[test]
fn test_groupby_sum_reports_grouping_and_value_columns() {
    let sandbox = ExecutionSandbox::default();
    let result = sandbox.execute("result = df.groupby('region')['sales'].sum()", &sales());

    assert!(result.success(), "{:?}", result.error());
    assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);
    assert_eq!(result.lineage_source(), LineageSource::Dynamic);
    assert_eq!(
        result.result_value(),
        &ResolvedValue::Present(json!({"East": 200, "North": 50, "West": 400}))
    );
    assert_eq!(result.result_type(), ValueKind::Series);
    assert!(result.visualizations().is_empty());
    assert!(result.error().is_none());
}

#[test]
fn test_missing_column_is_runtime_failure_with_partial_lineage() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
regions = df['region'].unique()
result = df['profit'].sum()
";
    let result = sandbox.execute(source, &sales());

    assert!(!result.success());
    let error = result.error().expect("error info");
    assert_eq!(error.kind, ErrorKind::RuntimeFailure);
    assert_eq!(error.line, Some(2));
    assert!(error.detail.contains("profit"));
    assert_eq!(result.columns_used(), &["region".to_string()]);
    assert!(result.visualizations().is_empty());
    assert_eq!(result.result_value(), &ResolvedValue::Absent);
}

#[test]
fn test_charts_without_result_are_captured_in_order() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
import matplotlib.pyplot as plt

plt.figure(figsize=(6, 4))
plt.bar(df['region'], df['sales'])
plt.title('Sales by region')

fig, ax = plt.subplots()
ax.plot(df['date'], df['sales'])
ax.set_title('Sales over time')
";
    let result = sandbox.execute(source, &sales());

    assert!(result.success(), "{:?}", result.error());
    assert_eq!(result.result_value(), &ResolvedValue::Absent);
    let charts = result.visualizations();
    assert_eq!(charts.len(), 2);
    assert_eq!(charts[0].title.as_deref(), Some("Sales by region"));
    assert_eq!(charts[1].title.as_deref(), Some("Sales over time"));
    for chart in charts {
        assert_eq!(chart.mime_type, "image/png");
        let bytes = chart.bytes().expect("base64 payload");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
    assert_eq!(open_figures(), 0);
}

#[test]
fn test_charts_drawn_before_a_fault_are_returned() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
df.plot(kind='bar', x='region', y='sales', title='Before failure')
result = df['profit']
";
    let result = sandbox.execute(source, &sales());
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFailure));
    assert_eq!(result.visualizations().len(), 1);
    assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);
    assert_eq!(open_figures(), 0);
}

#[test]
fn test_repeated_runs_are_identical() {
    let sandbox = ExecutionSandbox::default();
    let dataset = sales();
    let source = "\
import matplotlib.pyplot as plt
totals = df.groupby('region')['sales'].sum()
totals.plot(kind='bar')
result = totals.to_dict()
";
    let first = sandbox.execute(source, &dataset);
    let second = sandbox.execute(source, &dataset);

    assert!(first.success(), "{:?}", first.error());
    assert_eq!(first.columns_used(), second.columns_used());
    assert_eq!(first.result_value(), second.result_value());
    assert_eq!(first.visualizations(), second.visualizations());
    assert_ne!(first.execution_id(), second.execution_id());
    assert_eq!(open_figures(), 0);
}

#[test]
fn test_no_state_leaks_between_runs() {
    let sandbox = ExecutionSandbox::default();
    let dataset = sales();
    let first = sandbox.execute("leaked = 42\ndf['extra'] = 1\nresult = df['sales'].max()", &dataset);
    assert!(first.success(), "{:?}", first.error());

    let second = sandbox.execute("result = leaked", &dataset);
    assert_eq!(second.error_kind(), Some(ErrorKind::RuntimeFailure));
    assert!(second.columns_used().is_empty());

    let third = sandbox.execute("result = list(df.columns)", &dataset);
    assert_eq!(
        third.result_value(),
        &ResolvedValue::Present(json!(["date", "region", "sales"]))
    );
    assert_eq!(dataset.column_names(), vec!["date", "region", "sales"]);
}

#[test]
fn test_infinite_loop_times_out() {
    let mut config = SandboxConfig::default();
    config.limits.timeout = Duration::from_millis(200);
    config.limits.max_operations = u64::MAX;
    let sandbox = ExecutionSandbox::new(config);

    let result = sandbox.execute("total = df['sales'].sum()\nwhile True:\n    pass\n", &sales());
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(result.columns_used(), &["sales".to_string()]);
    assert!(result.elapsed_ms() < 5_000);
}

#[test]
fn test_resource_ceilings() {
    let mut config = SandboxConfig::default();
    config.limits.max_collection_len = 1_000;
    let sandbox = ExecutionSandbox::new(config);

    let result = sandbox.execute("result = list(range(10_000))", &sales());
    assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExhaustion));

    let result = sandbox.execute("def f(n):\n    return f(n)\nresult = f(1)\n", &sales());
    assert_eq!(result.error_kind(), Some(ErrorKind::ResourceExhaustion));
}

#[test]
fn test_syntax_error_is_compile_failure() {
    let sandbox = ExecutionSandbox::default();
    let result = sandbox.execute("result = df.groupby('region'\n", &sales());
    assert_eq!(result.error_kind(), Some(ErrorKind::CompileFailure));
    assert!(result.visualizations().is_empty());
}

#[test]
fn test_result_bound_to_none_is_present() {
    let sandbox = ExecutionSandbox::default();
    let result = sandbox.execute("answer = None", &sales());
    assert!(result.success());
    assert_eq!(result.result_value(), &ResolvedValue::Present(serde_json::Value::Null));
    assert_eq!(result.result_name(), Some("answer"));
}

#[test]
fn test_caught_faults_do_not_fail_the_run() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
try:
    value = df['profit'].sum()
except KeyError:
    value = df['sales'].sum()
result = value
";
    let result = sandbox.execute(source, &sales());
    assert!(result.success(), "{:?}", result.error());
    assert_eq!(result.result_value(), &ResolvedValue::Present(json!(650)));
    assert_eq!(result.columns_used(), &["sales".to_string()]);
}

#[test]
fn test_execution_result_serializes_to_documented_shape() {
    let sandbox = ExecutionSandbox::default();
    let result = sandbox.execute("result = df['sales'].mean()", &sales());
    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["result_value"]["status"], "present");
    assert_eq!(json["result_value"]["value"], 162.5);
    assert_eq!(json["columns_used"], json!(["sales"]));
    assert_eq!(json["lineage_source"], "dynamic");
    assert!(json["error"].is_null());
}

#[test]
fn test_grouping_keyword_with_two_columns_records_both() {
    let sandbox = ExecutionSandbox::default();
    let result = sandbox.execute("result = df.groupby(by=['region', 'date']).size()", &sales());
    let used = result.columns_used();
    assert!(used.contains(&"region".to_string()), "{:?}", used);
    assert!(used.contains(&"date".to_string()), "{:?}", used);
}

#[test]
fn test_agg_mapping_records_aggregated_column() {
    let sandbox = ExecutionSandbox::default();
    let result = sandbox.execute("result = df.groupby('region').agg({'sales': 'sum'})", &sales());
    assert!(result.success(), "{:?}", result.error());
    assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);
}

#[test]
fn test_named_aggregation_records_source_column() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
summary = df.groupby('region').agg(total=('sales', 'sum'))
result = summary['total'].max()
";
    let result = sandbox.execute(source, &sales());
    assert!(result.success(), "{:?}", result.error());
    assert_eq!(result.result_value(), &ResolvedValue::Present(json!(400)));
    assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);
}

#[test]
fn test_integer_overflow_keeps_partial_output() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
import matplotlib.pyplot as plt
total = df['sales'].sum()
plt.figure()
plt.plot([1, 2], [3, 4])
print('before')
x = (-9223372036854775807 - 1) % -1
result = abs(-9223372036854775807 - 1) + x
";
    let result = sandbox.execute(source, &sales());
    assert!(result.success(), "{:?}", result.error());
    assert_eq!(result.result_value(), &ResolvedValue::Present(json!(9.223372036854775808e18)));
    assert_eq!(result.visualizations().len(), 1);
    assert_eq!(result.output(), "before\n");
    assert_eq!(result.columns_used(), &["sales".to_string()]);
}

#[test]
fn test_chart_capture_is_bounded_after_timeout() {
    let mut config = SandboxConfig::default();
    config.limits.timeout = Duration::from_millis(1_000);
    config.limits.max_operations = u64::MAX;
    let sandbox = ExecutionSandbox::new(config);
    let source = "\
import matplotlib.pyplot as plt
ys = [0, 1] * 50000
for n in range(16):
    plt.figure(figsize=(6, 4))
    plt.plot(ys)
while True:
    pass
";
    let result = sandbox.execute(source, &sales());
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert!(!result.visualizations().is_empty());
    assert!(result.elapsed_ms() < 6_000, "took {} ms", result.elapsed_ms());
    assert_eq!(open_figures(), 0);
}

#[test]
fn test_static_fallback_ignores_columns_named_in_messages() {
    let sandbox = ExecutionSandbox::default();
    let source = "\
x = 1 / 0
print(\"see df['region'] for details\")
result = df['sales'].sum()
";
    let result = sandbox.execute(source, &sales());
    assert_eq!(result.lineage_source(), LineageSource::Static);
    assert_eq!(result.columns_used(), &["sales".to_string()]);
}
