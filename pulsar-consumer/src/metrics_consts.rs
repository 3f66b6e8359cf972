pub const MESSAGES_RECEIVED: &str = "pulsar_consumer_messages_received_total";
pub const MESSAGES_HANDLED: &str = "pulsar_consumer_messages_handled_total";
pub const HANDLER_ERRORS: &str = "pulsar_consumer_handler_errors_total";
pub const RECEIVE_ERRORS: &str = "pulsar_consumer_receive_errors_total";
pub const ACK_ERRORS: &str = "pulsar_consumer_ack_errors_total";
pub const ASYNC_ERRORS: &str = "pulsar_consumer_async_errors_total";
pub const FLOW_PERMITS_AVAILABLE: &str = "pulsar_consumer_flow_permits_available";
pub const FLOW_WAIT_SECONDS: &str = "pulsar_consumer_flow_wait_seconds";
pub const PARTITION_LOOKUP_ERRORS: &str = "pulsar_consumer_partition_lookup_errors_total";
