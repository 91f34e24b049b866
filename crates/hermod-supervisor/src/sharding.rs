/// Hash-based sharding fallback used when no resource metrics are
/// available for weighted rendezvous hashing (spec §4.5).
pub fn owns_by_hash(workflow_id: &str, worker_id: u32, total_workers: u32) -> bool {
    if total_workers == 0 {
        return false;
    }
    let h = fxhash::hash64(workflow_id.as_bytes());
    (h % total_workers as u64) as u32 == worker_id
}
