//! Reference action: current local time and date.
//!
//! The simplest useful handler, shipped as the registry's worked example;
//! real deployments register their own set (robot motion, lookups, …).

use async_trait::async_trait;

use super::ActionHandler;

pub struct ClockAction;

#[async_trait]
impl ActionHandler for ClockAction {
    fn name(&self) -> &str {
        "get_current_time"
    }

    async fn invoke(&self, _arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let now = chrono::Local::now();
        let time = now.format("%I:%M %p").to_string();
        let date = now.format("%B %d, %Y").to_string();
        Ok(serde_json::json!({
            "time": time,
            "date": date,
            "message": format!("The current time is {time} on {date}"),
        }))
    }
}
