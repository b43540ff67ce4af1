//! Fuzz target for credential handling on the request path.
//!
//! Authorization headers, request paths and tokens are attacker controlled,
//! so parsing them must never panic and a forged token must never verify.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_credentials -- -max_total_time=60
//! ```

#![no_main]

use std::sync::LazyLock;
use std::time::Duration;

use cineforge_gateway::TokenCodec;
use cineforge_gateway::middleware::{ExemptPathSet, parse_bearer};
use jsonwebtoken::Algorithm;
use libfuzzer_sys::fuzz_target;

static CODEC: LazyLock<TokenCodec> = LazyLock::new(|| {
    TokenCodec::new("fuzz-secret", Algorithm::HS256, Duration::ZERO)
        .expect("static secret is valid")
});

static EXEMPT: LazyLock<ExemptPathSet> =
    LazyLock::new(|| ExemptPathSet::new(["/auth", "/health", "/docs"]));

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(token) = parse_bearer(s) {
        assert!(!token.is_empty());
        assert!(CODEC.verify(token).is_err());
    }

    let exempt = EXEMPT.is_exempt(s);
    if exempt {
        assert!(s.starts_with('/'));
    }

    assert!(CODEC.verify(s).is_err());
});
