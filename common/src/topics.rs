pub const TOPIC_STATE: &str = "wifi-switch/state";
pub const TOPIC_EVENT_PREFIX: &str = "wifi-switch/event";

pub fn event_topic(name: &str) -> String {
    format!("{TOPIC_EVENT_PREFIX}/{name}")
}
