// Worker-count chooser used when --threads is not given.
// Many small artifacts scale with sqrt(n); large average sizes pull the count down.
pub fn choose_auto_concurrency(total_ops: usize, total_size_bytes: u64) -> usize {
    if total_ops <= 1 {
        return 1;
    }

    if total_size_bytes > 100 * 1024 * 1024 && total_ops <= 4 {
        return 4;
    }

    if total_ops >= 50_000 {
        return 16;
    }

    let mut base = ((total_ops as f64).sqrt().round() as usize).max(1);

    let avg_size = total_size_bytes / (total_ops as u64);
    if avg_size > 100 * 1024 * 1024 {
        base = ((base as f64) * 0.25).max(1.0) as usize;
    } else if avg_size > 1024 * 1024 {
        base = ((base as f64) * 0.5).max(1.0) as usize;
    }

    base.clamp(1, 16)
}
