use crate::peer::types::{IceCandidate, ServerConfig};
use rand::Rng;
use sha2::{Digest, Sha256};

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Отпечаток кандидата по содержимому: одна и та же строка, пришедшая
/// дважды (ack ответа + отдельный push), даёт один и тот же отпечаток
pub fn candidate_fingerprint(candidate: &IceCandidate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(candidate.candidate.trim().as_bytes());
    hasher.update([0]);
    hasher.update(candidate.sdp_mid.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(
        candidate
            .sdp_mline_index
            .map(|i| i.to_be_bytes())
            .unwrap_or([0xff, 0xff]),
    );
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_is_added_only_when_missing() {
        assert_eq!(
            add_ice_url_scheme(&server("turn", "relay.example:3478")),
            "turn:relay.example:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server("stun", "stun.example:19302")),
            "stun:stun.example:19302"
        );
        assert_eq!(
            add_ice_url_scheme(&server("turn", "stun:already.example")),
            "stun:already.example"
        );
    }

    #[test]
    fn fingerprint_ignores_surrounding_whitespace_but_not_mid() {
        let a = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host");
        let mut b = a.clone();
        b.candidate = format!(" {} ", a.candidate);
        assert_eq!(candidate_fingerprint(&a), candidate_fingerprint(&b));

        let mut c = a.clone();
        c.sdp_mid = Some("1".into());
        assert_ne!(candidate_fingerprint(&a), candidate_fingerprint(&c));
    }

    #[test]
    fn random_ids_are_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
