//! Byte budgets for progressive fetching
//!
//! A page is first fetched with a small budget. If the prefix does not yield
//! a preview, the budget grows geometrically until it reaches the cap.

/// Size of the first attempt: `initial` clamped to `cap`, or `cap` when
/// `initial` is 0
pub fn first_attempt(initial: usize, cap: usize) -> usize {
    if initial == 0 {
        cap
    } else {
        initial.min(cap)
    }
}

/// Size of the attempt after `attempt`, or `None` once the cap was reached
///
/// Always grows by at least one byte, so a growth factor at or below 1 still
/// terminates.
pub fn next_attempt(attempt: usize, growth: f64, cap: usize) -> Option<usize> {
    if attempt >= cap {
        return None;
    }

    let grown = (attempt as f64 * growth).floor() as usize;
    Some(grown.max(attempt + 1).min(cap))
}

/// Every attempt size from the first to the cap
pub fn attempt_sizes(initial: usize, growth: f64, cap: usize) -> impl Iterator<Item = usize> {
    std::iter::successors(Some(first_attempt(initial, cap)), move |&attempt| {
        next_attempt(attempt, growth, cap)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: usize = 1024;
    const MB: usize = 1024 * 1024;

    #[test]
    fn test_default_budgets_reach_cap_in_four_steps() {
        let sizes: Vec<usize> = attempt_sizes(512 * KB, 2.0, 8 * MB).collect();
        assert_eq!(sizes, vec![512 * KB, MB, 2 * MB, 4 * MB, 8 * MB]);
    }

    #[test]
    fn test_first_attempt() {
        assert_eq!(first_attempt(0, 100), 100);
        assert_eq!(first_attempt(50, 100), 50);
        assert_eq!(first_attempt(500, 100), 100);
    }

    #[test]
    fn test_growth_clamped_to_cap() {
        assert_eq!(next_attempt(600, 2.0, 1000), Some(1000));
        assert_eq!(next_attempt(1000, 2.0, 1000), None);
        assert_eq!(next_attempt(2000, 2.0, 1000), None);
    }

    #[test]
    fn test_flat_growth_still_progresses() {
        assert_eq!(next_attempt(10, 1.0, 100), Some(11));
        assert_eq!(next_attempt(10, 0.5, 100), Some(11));
        assert_eq!(attempt_sizes(3, 1.0, 5).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn test_non_integral_growth_floors() {
        assert_eq!(next_attempt(100, 1.5, 1000), Some(150));
        assert_eq!(next_attempt(3, 1.5, 1000), Some(4));
    }
}
