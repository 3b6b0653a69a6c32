// ==== Mock consumer metrics ====
/// Counter for poll calls that got past the closed check
pub const MOCK_CONSUMER_POLLS: &str = "mock_consumer_polls_total";

/// Counter for records handed back by poll
pub const MOCK_CONSUMER_RECORDS_DELIVERED: &str = "mock_consumer_records_delivered_total";

/// Counter for buffered records dropped because their partition was no longer assigned
pub const MOCK_CONSUMER_RECORDS_DISCARDED: &str = "mock_consumer_records_discarded_total";

/// Counter for scheduled poll tasks executed
pub const MOCK_CONSUMER_POLL_TASKS_RUN: &str = "mock_consumer_poll_tasks_run_total";

/// Counter for polls aborted by a wakeup
pub const MOCK_CONSUMER_WAKEUPS: &str = "mock_consumer_wakeups_total";

/// Counter for injected errors surfaced by poll
pub const MOCK_CONSUMER_INJECTED_ERRORS: &str = "mock_consumer_injected_errors_total";
