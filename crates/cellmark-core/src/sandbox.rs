use std::io::{self, Write};

use crate::env::{Bindings, Value};

/// Name of the pseudo-random generator state injected into the Binding
/// Environment. Reserved: user code reaches it only through `rand`,
/// `rand-int`, and `seed!`.
pub const RNG_STATE_NAME: &str = "__rng_state";

/// Generator state used when code draws randomness without any seeding.
pub const UNSEEDED_STATE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Where engine-visible output (`print`, stray diagnostics) goes during a
/// run. Grading uses `Discard`; `Capture` exists so tests can assert that
/// suppression actually happened. The sink lives for exactly one execution
/// scope, so restoration on every exit path (including failures) falls out
/// of scoping rather than global-stream fiddling.
#[derive(Debug)]
pub enum OutputSink {
    Discard,
    Capture(Vec<u8>),
}

impl OutputSink {
    pub fn discard() -> Self {
        OutputSink::Discard
    }

    pub fn capture() -> Self {
        OutputSink::Capture(Vec::new())
    }

    pub fn captured(&self) -> &[u8] {
        match self {
            OutputSink::Discard => &[],
            OutputSink::Capture(buf) => buf,
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Discard => Ok(buf.len()),
            OutputSink::Capture(out) => {
                out.extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Inject fixed-seed generator state into the Binding Environment before
/// any user code runs.
pub fn seed_bindings(env: &mut Bindings, seed: u64) {
    env.insert(RNG_STATE_NAME, Value::Int(mix_seed(seed) as i64));
}

/// The statement prepended to every cell when a seed is configured, so
/// intra-cell and inter-cell generator state stays reproducible.
pub fn seeding_stmt(seed: u64) -> String {
    format!("(seed! {seed})\n")
}

/// Initial state derivation for a user-supplied seed.
pub fn mix_seed(seed: u64) -> u64 {
    let mut s = seed.wrapping_add(UNSEEDED_STATE);
    next_u64(&mut s)
}

/// splitmix64 step: advances `state` and returns the next draw.
pub fn next_u64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Uniform draw in `[0, 1)` with 53 bits of precision.
pub fn unit_f64(state: &mut u64) -> f64 {
    (next_u64(state) >> 11) as f64 / (1u64 << 53) as f64
}

/// Run-scoped secret token for the hidden result collection name.
pub fn secret_token() -> String {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        // Entropy failure leaves a time-derived token; still per-run unique
        // for any realistic clock.
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(UNSEEDED_STATE);
        bytes = now.to_le_bytes();
    }
    hex_lower(&bytes)
}

pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nybble_to_hex((b >> 4) & 0x0f));
        out.push(nybble_to_hex(b & 0x0f));
    }
    out
}

fn nybble_to_hex(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '0',
    }
}
