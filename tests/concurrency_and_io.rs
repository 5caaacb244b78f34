use analysis_sandbox::plot::open_figures;
use analysis_sandbox::{
    AsyncSandbox, Dataset, ExecutionReport, ExecutionSandbox, LineageSource, ResolvedValue,
    SandboxConfig,
};
use polars::prelude::*;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::thread;

fn orders() -> Dataset {
    let df = df! [
        "order_id" => [1i64, 2, 3, 4, 5, 6],
        "customer" => ["a", "b", "a", "c", "b", "a"],
        "category" => ["toys", "books", "books", "toys", "games", "toys"],
        "amount" => [10.0, 20.0, 5.0, 7.5, 12.5, 2.5]
    ]
    .unwrap();
    Dataset::new(df)
}

#[test]
fn test_concurrent_executions_keep_separate_logs_and_charts() {
    let sandbox = Arc::new(ExecutionSandbox::default());
    let dataset = Arc::new(orders());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let sandbox = Arc::clone(&sandbox);
            let dataset = Arc::clone(&dataset);
            thread::spawn(move || {
                let source = if i % 2 == 0 {
                    "import matplotlib.pyplot as plt\nplt.hist(df['amount'])\nresult = df['amount'].sum()"
                } else {
                    "result = df.groupby('customer').size()"
                };
                (i, sandbox.execute(source, &dataset))
            })
        })
        .collect();

    for handle in handles {
        let (i, result) = handle.join().unwrap();
        assert!(result.success(), "{:?}", result.error());
        if i % 2 == 0 {
            assert_eq!(result.columns_used(), &["amount".to_string()]);
            assert_eq!(result.visualizations().len(), 1);
            assert_eq!(result.result_value(), &ResolvedValue::Present(json!(57.5)));
        } else {
            assert_eq!(result.columns_used(), &["customer".to_string()]);
            assert!(result.visualizations().is_empty());
            assert_eq!(
                result.result_value(),
                &ResolvedValue::Present(json!({"a": 3, "b": 2, "c": 1}))
            );
        }
    }
    assert_eq!(open_figures(), 0);
    assert_eq!(sandbox.history().len(), 8);
}

#[tokio::test]
async fn test_async_front_door() {
    let sandbox = AsyncSandbox::default();
    let dataset = Arc::new(orders());

    let (first, second) = tokio::join!(
        sandbox.execute("result = df.sort_values(by='amount', ascending=False).head(2)['order_id'].tolist()", Arc::clone(&dataset)),
        sandbox.execute("answer = df['category'].nunique()", Arc::clone(&dataset)),
    );

    assert_eq!(first.result_value(), &ResolvedValue::Present(json!([2, 5])));
    assert_eq!(first.columns_used(), &["amount".to_string(), "order_id".to_string()]);
    assert_eq!(second.result_value(), &ResolvedValue::Present(json!(3)));
    assert_eq!(sandbox.history().len(), 2);
}

#[test]
fn test_static_fallback_only_reports_real_columns() {
    let sandbox = ExecutionSandbox::default();
    // the proxy never sees a column because the script fails first
    let source = "\
rate = 1 / 0
# df['commented_out'] is ignored
summary = df.groupby(['customer', 'region'])[['amount', 'margin']].sum()
";
    let result = sandbox.execute(source, &orders());
    assert_eq!(result.lineage_source(), LineageSource::Static);
    assert_eq!(result.columns_used(), &["amount".to_string(), "customer".to_string()]);
}

#[test]
fn test_csv_dataset_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "date,region,sales").unwrap();
    writeln!(file, "2024-01-01,East,10").unwrap();
    writeln!(file, "2024-01-02,West,20").unwrap();
    writeln!(file, "2024-01-03,East,5").unwrap();

    let dataset = Dataset::from_csv(file.path()).unwrap();
    let sandbox = ExecutionSandbox::default();
    let source = "\
by_region = df.groupby('region', as_index=False)['sales'].sum()
leader = by_region.sort_values('sales', ascending=False).iloc[0]['region']
best = by_region['sales'].max()
result = f\"{leader} leads with {best:,} in sales\"
";
    let result = sandbox.execute(source, &dataset);
    assert!(result.success(), "{:?}", result.error());
    assert_eq!(
        result.result_value(),
        &ResolvedValue::Present(json!("West leads with 20 in sales"))
    );
    assert_eq!(result.columns_used(), &["region".to_string(), "sales".to_string()]);

    let report = ExecutionReport::new(Some("Which region leads?"), source, &result);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["result"]["type"], "scalar");
    assert_eq!(json["query"], "Which region leads?");
}

#[test]
fn test_config_from_lookup_drives_the_sandbox() {
    let config = SandboxConfig::from_lookup(|key| match key {
        "SANDBOX_DATASET_IDENT" => Some("data".to_string()),
        "SANDBOX_RESULT_NAME" => Some("out".to_string()),
        _ => None,
    })
    .unwrap();
    let sandbox = ExecutionSandbox::new(config);
    let result = sandbox.execute("out = len(data)", &orders());
    assert_eq!(result.result_name(), Some("out"));
    assert_eq!(result.result_value(), &ResolvedValue::Present(json!(6)));
}
