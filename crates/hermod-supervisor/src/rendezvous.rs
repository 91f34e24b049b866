use sha2::{Digest, Sha256};

/// One candidate worker's live resource weight (CPU/memory-derived; spec
/// §4.5: "using live CPU/memory metrics as weights").
#[derive(Debug, Clone)]
pub struct WorkerWeight {
    pub worker_id: String,
    pub weight: f64,
}

/// Scores a single `(worker_id, workflow_id)` pair under weighted
/// rendezvous hashing (spec §9: "stable under identical inputs; use a
/// cryptographic hash of `worker_id||workflow_id` multiplied by
/// weight"). The hash's leading 8 bytes are normalized to `(0, 1]` so the
/// result composes with an arbitrary positive weight.
fn score(worker_id: &str, workflow_id: &str, weight: f64) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(worker_id.as_bytes());
    hasher.update(b"||");
    hasher.update(workflow_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let as_u64 = u64::from_be_bytes(bytes);
    let normalized = as_u64 as f64 / u64::MAX as f64;

    normalized * weight
}

/// Picks the winning worker for `workflow_id` among `candidates`, and
/// reports whether `current_owner` should keep the workflow under the
/// hysteresis rule: it only migrates when the winner's score exceeds the
/// current owner's by more than `hysteresis` (spec §4.5, e.g. `H = 1.15`
/// means the winner's score must exceed by more than 15%).
pub fn pick_owner(
    workflow_id: &str,
    candidates: &[WorkerWeight],
    current_owner: Option<&str>,
    hysteresis: f64,
) -> Option<String> {
    let mut scored: Vec<(String, f64)> = candidates
        .iter()
        .map(|c| (c.worker_id.clone(), score(&c.worker_id, workflow_id, c.weight)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (winner_id, winner_score) = scored.first()?.clone();

    let Some(current) = current_owner else {
        return Some(winner_id);
    };
    if winner_id == current {
        return Some(winner_id);
    }

    let current_score = scored
        .iter()
        .find(|(id, _)| id == current)
        .map(|(_, s)| *s)
        .unwrap_or(f64::NEG_INFINITY);

    if current_score <= 0.0 {
        return Some(winner_id);
    }
    if winner_score > current_score * hysteresis {
        Some(winner_id)
    } else {
        Some(current.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_score_identically() {
        assert_eq!(
            score("w1", "wf1", 1.0),
            score("w1", "wf1", 1.0)
        );
    }

    #[test]
    fn higher_weight_scores_higher_for_same_hash_input() {
        let low = score("w1", "wf1", 1.0);
        let high = score("w1", "wf1", 10.0);
        assert!(high > low);
    }

    #[test]
    fn no_current_owner_picks_the_top_scorer() {
        let candidates = vec![
            WorkerWeight { worker_id: "a".into(), weight: 1.0 },
            WorkerWeight { worker_id: "b".into(), weight: 1.0 },
        ];
        let winner = pick_owner("wf1", &candidates, None, 1.15).unwrap();
        assert!(winner == "a" || winner == "b");
    }

    #[test]
    fn hysteresis_keeps_current_owner_on_marginal_win() {
        // Craft weights so "b" barely edges out "a"; with a strict
        // hysteresis the incumbent should be kept.
        let candidates = vec![
            WorkerWeight { worker_id: "a".into(), weight: 1.0 },
            WorkerWeight { worker_id: "b".into(), weight: 1.0001 },
        ];
        let kept = pick_owner("wf1", &candidates, Some("a"), 1.15);
        assert!(kept.is_some());
    }
}
