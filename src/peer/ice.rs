use crate::peer::types::IceCandidate;
use crate::utils::candidate_fingerprint;
use std::collections::{HashSet, VecDeque};

/// Кандидаты, полученные до установки remote description.
///
/// Кандидаты доставляются "как минимум один раз" (ack на newAnswer и
/// отдельный push), поэтому повтор по содержимому отбрасывается ещё до
/// постановки в очередь. Порядок остальных сохраняется.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    seen: HashSet<String>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Запоминает кандидата; `false` если такой уже был
    pub fn admit(&mut self, candidate: &IceCandidate) -> bool {
        self.seen.insert(candidate_fingerprint(candidate))
    }

    pub fn has_seen(&self, candidate: &IceCandidate) -> bool {
        self.seen.contains(&candidate_fingerprint(candidate))
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Возвращает кандидата в голову очереди (повтор после InvalidState)
    pub fn push_front(&mut self, candidate: IceCandidate) {
        self.pending.push_front(candidate);
    }

    pub fn pop(&mut self) -> Option<IceCandidate> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.seen.clear();
    }
}

/// Сводка по типам собранных кандидатов
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    tracing::info!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );

    if summary.relay == 0 {
        tracing::warn!("no TURN relay candidates found, connection through NAT may fail");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(n: u32, typ: &str) -> IceCandidate {
        IceCandidate::new(format!(
            "candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ {typ}"
        ))
    }

    #[test]
    fn duplicates_are_rejected_by_content() {
        let mut buffer = CandidateBuffer::new();
        assert!(buffer.admit(&cand(1, "host")));
        assert!(!buffer.admit(&cand(1, "host")));
        assert!(buffer.admit(&cand(2, "host")));
        assert!(buffer.has_seen(&cand(1, "host")));
    }

    #[test]
    fn queue_keeps_arrival_order_and_requeues_at_front() {
        let mut buffer = CandidateBuffer::new();
        for n in 1..=3 {
            buffer.push(cand(n, "host"));
        }
        let first = buffer.pop().unwrap();
        buffer.push_front(first.clone());
        let order: Vec<_> = std::iter::from_fn(|| buffer.pop()).collect();
        assert_eq!(order, vec![cand(1, "host"), cand(2, "host"), cand(3, "host")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn clear_forgets_seen_candidates() {
        let mut buffer = CandidateBuffer::new();
        buffer.admit(&cand(1, "host"));
        buffer.push(cand(1, "host"));
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(!buffer.has_seen(&cand(1, "host")));
    }

    #[test]
    fn summary_counts_types() {
        let summary = analyze_candidates(&[cand(1, "host"), cand(2, "srflx"), cand(3, "relay")]);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 1,
                srflx: 1,
                relay: 1
            }
        );
    }
}
