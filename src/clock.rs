/// Read CLOCK_MONOTONIC in nanoseconds.
///
/// The engine itself is clock-source agnostic (mark timestamps are
/// caller-supplied); this helper is for callers and the sweeper thread,
/// which must share the marks' clock. Returns 0 if the call fails.
pub fn monotonic_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
        return 0;
    }
    (ts.tv_sec as u64 * 1_000_000_000) + ts.tv_nsec as u64
}
