use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Computes the salted checksum an agent must present to submit against
/// `task_id` as `agent_id`. Shared with the task-generation tool: must stay
/// deterministic and independent of wall-clock time.
pub fn compute_checksum(task_id: &str, agent_id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(task_id.as_bytes());
    hasher.update(b":");
    hasher.update(agent_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies a submitted checksum in constant time.
pub fn verify_task(task_id: &str, agent_id: &str, supplied_checksum: &str, salt: &str) -> bool {
    let expected = compute_checksum(task_id, agent_id, salt);
    expected.as_bytes().ct_eq(supplied_checksum.as_bytes()).into()
}
