use metrics::describe_counter;
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register descriptions for the crate's counters with whatever recorder is
/// installed. Safe to call repeatedly.
pub fn ensure_metrics_described() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("notifier_checks_total", "Source polls attempted");
        describe_counter!("notifier_check_errors_total", "Source polls that returned an error");
        describe_counter!("notifier_push_sent_total", "Pushes delivered to a destination");
        describe_counter!("notifier_push_failed_total", "Pushes a destination backend rejected");
        describe_counter!("notifier_reports_total", "Status reports sent to destinations");
    });
}
