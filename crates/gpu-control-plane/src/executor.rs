//! A stand-in for the GPU execution collaborator. Real deployments route
//! `execute` to a GPU runner; this one just advances a turn counter after a
//! short simulated delay, enough to exercise the worker loop's renewal
//! cadence end to end.

use async_trait::async_trait;
use gpu_sched_core::store::AgentExecutor;
use serde_json::{json, Value as JsonValue};

pub struct SimulatedAgentExecutor {
    pub turn_delay_ms: u64,
}

impl Default for SimulatedAgentExecutor {
    fn default() -> Self {
        Self { turn_delay_ms: 50 }
    }
}

#[async_trait]
impl AgentExecutor for SimulatedAgentExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        prompt: &str,
        state: JsonValue,
    ) -> anyhow::Result<JsonValue> {
        tokio::time::sleep(std::time::Duration::from_millis(self.turn_delay_ms)).await;

        let turn = state.get("turn").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
        Ok(json!({
            "agent_id": agent_id,
            "turn": turn,
            "last_prompt": prompt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_turn_increments_the_counter() {
        let executor = SimulatedAgentExecutor { turn_delay_ms: 0 };
        let first = executor
            .execute("agent-1", "hello", JsonValue::Null)
            .await
            .unwrap();
        assert_eq!(first["turn"], 1);

        let second = executor.execute("agent-1", "again", first).await.unwrap();
        assert_eq!(second["turn"], 2);
    }
}
