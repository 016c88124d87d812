use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::HumanSection;

/// Produces the delays that make form input look typed by hand.
#[derive(Debug)]
pub struct HumanCadence {
    config: HumanSection,
    rng: StdRng,
}

impl HumanCadence {
    pub fn new(config: HumanSection) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(config: HumanSection, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pause between two keystrokes: the chosen cadence plus a small jitter.
    pub fn typing_delay(&mut self) -> Duration {
        let [low, high] = ordered(self.config.typing_cadence_cpm);
        let cadence = self.rng.gen_range(low..=high).max(60) as f64;
        let base_delay = 60.0 / cadence;
        let [jitter_low, jitter_high] = ordered(self.config.typing_jitter_ms);
        let jitter_ms = self.rng.gen_range(jitter_low..=jitter_high);
        Duration::from_secs_f64(base_delay + jitter_ms as f64 / 1000.0)
    }

    pub fn click_hesitation(&mut self) -> Duration {
        let [low, high] = ordered(self.config.click_hesitation_ms);
        Duration::from_millis(u64::from(self.rng.gen_range(low..=high)))
    }
}

fn ordered(bounds: [u32; 2]) -> [u32; 2] {
    if bounds[0] <= bounds[1] {
        bounds
    } else {
        [bounds[1], bounds[0]]
    }
}
