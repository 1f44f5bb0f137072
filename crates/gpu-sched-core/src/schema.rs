//! Deterministic key naming. Tenant-scoped records live under `t:{tenant}:...`;
//! system-wide records (the two streams and the reservations index) live under
//! `sys:...` and are mutated only through the atomic operations in [`crate::store`].

pub fn job_key(tenant_id: &str, job_id: &str) -> String {
    format!("t:{tenant_id}:job:{job_id}")
}

pub fn quota_key(tenant_id: &str) -> String {
    format!("t:{tenant_id}:quota:gpu")
}

pub fn agent_pointer_key(tenant_id: &str, agent_id: &str) -> String {
    format!("t:{tenant_id}:agent:{agent_id}:pointer")
}

pub fn idempotency_key(tenant_id: &str, key: &str) -> String {
    format!("t:{tenant_id}:idem:{key}")
}

pub fn queue_key() -> &'static str {
    "sys:queue:jobs"
}

pub fn delayed_queue_key() -> &'static str {
    "sys:queue:jobs:delayed"
}

pub fn reservations_key() -> &'static str {
    "sys:gpu:reservations"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_is_tenant_scoped() {
        assert_eq!(job_key("acme", "j1"), "t:acme:job:j1");
    }

    #[test]
    fn system_keys_have_no_tenant_scope() {
        assert_eq!(queue_key(), "sys:queue:jobs");
        assert_eq!(delayed_queue_key(), "sys:queue:jobs:delayed");
        assert_eq!(reservations_key(), "sys:gpu:reservations");
    }
}
