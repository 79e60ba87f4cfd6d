pub mod radix2;
pub mod spectrum;

pub use radix2::Radix2Plan;
pub use spectrum::dominant_frequency;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref PLAN_CACHE: Mutex<HashMap<usize, Arc<Radix2Plan>>> = Mutex::new(HashMap::new());
}

/// Returns the radix-2 plan for size `n`, building and caching it on first
/// use. `None` unless `n` is a power of two.
pub fn find_plan(n: usize) -> Option<Arc<Radix2Plan>> {
    // Cached plan lookup.
    {
        let cache = PLAN_CACHE.lock();
        if let Some(plan) = cache.get(&n) {
            return Some(plan.clone());
        }
    }

    let plan = Arc::new(Radix2Plan::new(n)?);
    log::debug!("Initializing FFT plan for N={}", n);

    // Cache the plan.
    let mut cache = PLAN_CACHE.lock();
    Some(cache.entry(n).or_insert(plan).clone())
}
