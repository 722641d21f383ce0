//! Single place the detectors and schedulers get the current Unix time from,
//! so tests can see exactly what a `now` argument means without reaching
//! into `std::time` at five different call sites.

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
