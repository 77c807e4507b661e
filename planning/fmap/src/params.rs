//! Tuning parameters of the planner.
//!
//! Each knob is an [`EnvParam`]: the name of an environment variable together with the textual
//! default used when the variable is absent. Parameters are read once, on first access, and
//! gathered into a [`PlannerConfig`] whose `Default` implementation reflects the environment.
//!
//! ```
//! use fmap::params::EnvParam;
//! static MAX_DEPTH: EnvParam<u32> = EnvParam::new("FMAP_DOC_MAX_DEPTH", "12");
//! assert_eq!(MAX_DEPTH.get(), 12);
//! ```

use once_cell::sync::OnceCell;
use std::fmt::Display;
use std::str::FromStr;

use crate::grounding::{NegationPolicy, SameObjects};
use crate::heuristics::HeuristicKind;
use crate::pop::refine::RefineLimits;

pub struct EnvParam<T> {
    value: OnceCell<T>,
    env: &'static str,
    default: &'static str,
}

impl<T> EnvParam<T> {
    pub const fn new(env: &'static str, default: &'static str) -> EnvParam<T> {
        EnvParam {
            value: OnceCell::new(),
            env,
            default,
        }
    }
}

impl<T: FromStr> EnvParam<T> {
    fn parse_default(&self) -> T {
        match T::from_str(self.default) {
            Ok(v) => v,
            Err(_) => panic!("[fmap] {}: invalid default value \"{}\"", self.env, self.default),
        }
    }

    /// Returns the value of the parameter, reading the environment on the first call.
    /// An unparsable environment value is reported and replaced by the default.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        *self.get_ref()
    }

    pub fn get_ref(&self) -> &T {
        self.value.get_or_init(|| match std::env::var(self.env) {
            Ok(text) => match T::from_str(&text) {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(
                        "could not parse \"{}\" for {}, using default \"{}\"",
                        text,
                        self.env,
                        self.default
                    );
                    self.parse_default()
                }
            },
            Err(_) => self.parse_default(),
        })
    }
}

/// Number of worker threads generating refinements. `0` selects the available parallelism.
pub static SEARCH_THREADS: EnvParam<usize> = EnvParam::new("FMAP_SEARCH_THREADS", "0");
pub static HEURISTIC: EnvParam<HeuristicKind> = EnvParam::new("FMAP_HEURISTIC", "ff-land");
/// Weight of the heuristic in `f = g + w * h`.
pub static H_WEIGHT: EnvParam<u32> = EnvParam::new("FMAP_H_WEIGHT", "2");
pub static SAME_OBJECTS: EnvParam<SameObjects> = EnvParam::new("FMAP_SAME_OBJECTS", "none");
pub static NEGATION: EnvParam<NegationPolicy> = EnvParam::new("FMAP_NEGATION", "failure");
/// Support combinations tried per inserted step. `0` is unbounded.
pub static MAX_SUPPORT_COMBINATIONS: EnvParam<usize> = EnvParam::new("FMAP_MAX_SUPPORT_COMBINATIONS", "0");
/// Threat resolutions kept per support combination. `0` is unbounded.
pub static MAX_THREAT_RESOLUTIONS: EnvParam<usize> = EnvParam::new("FMAP_MAX_THREAT_RESOLUTIONS", "0");

/// `0` stands for no limit.
fn limit(n: usize) -> Option<usize> {
    (n > 0).then_some(n)
}

const MAX_DEFAULT_THREADS: usize = 4;

/// Configuration shared by all phases of an agent.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub search_threads: usize,
    pub heuristic: HeuristicKind,
    pub h_weight: u32,
    pub same_objects: SameObjects,
    pub negation: NegationPolicy,
    /// Bounds on refinement generation. Any bound makes the search incomplete.
    pub limits: RefineLimits,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let threads = match SEARCH_THREADS.get() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get().min(MAX_DEFAULT_THREADS))
                .unwrap_or(1),
            n => n,
        };
        PlannerConfig {
            search_threads: threads,
            heuristic: HEURISTIC.get(),
            h_weight: H_WEIGHT.get(),
            same_objects: SAME_OBJECTS.get(),
            negation: NEGATION.get(),
            limits: RefineLimits {
                support_combinations: limit(MAX_SUPPORT_COMBINATIONS.get()),
                threat_resolutions: limit(MAX_THREAT_RESOLUTIONS.get()),
            },
        }
    }
}

impl PlannerConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.search_threads = threads.max(1);
        self
    }
    pub fn with_heuristic(mut self, heuristic: HeuristicKind) -> Self {
        self.heuristic = heuristic;
        self
    }
    pub fn with_negation(mut self, negation: NegationPolicy) -> Self {
        self.negation = negation;
        self
    }
    pub fn with_same_objects(mut self, policy: SameObjects) -> Self {
        self.same_objects = policy;
        self
    }
    pub fn with_limits(mut self, limits: RefineLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl Display for PlannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "threads={} heuristic={} w={} same-objects={} negation={}",
            self.search_threads, self.heuristic, self.h_weight, self.same_objects, self.negation
        )?;
        let show = |n: Option<usize>| n.map_or("none".to_string(), |n| n.to_string());
        if self.limits.is_bounded() {
            write!(
                f,
                " max-supports={} max-resolutions={}",
                show(self.limits.support_combinations),
                show(self.limits.threat_resolutions)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static UNSET: EnvParam<u32> = EnvParam::new("FMAP_TEST_UNSET_PARAM", "7");
    static GARBAGE: EnvParam<u32> = EnvParam::new("FMAP_TEST_GARBAGE_PARAM", "3");

    #[test]
    fn defaults_and_fallback() {
        assert_eq!(UNSET.get(), 7);
        unsafe { std::env::set_var("FMAP_TEST_GARBAGE_PARAM", "not-a-number") };
        assert_eq!(GARBAGE.get(), 3);
    }

    #[test]
    fn refinement_is_unbounded_by_default() {
        assert_eq!(PlannerConfig::default().limits, RefineLimits::UNBOUNDED);
        assert_eq!(limit(0), None);
        assert_eq!(limit(5), Some(5));
        let cfg = PlannerConfig::default().with_limits(RefineLimits {
            support_combinations: Some(3),
            threat_resolutions: None,
        });
        assert!(cfg.to_string().ends_with("max-supports=3 max-resolutions=none"));
    }

    #[test]
    fn builder_clamps_threads() {
        let cfg = PlannerConfig::default().with_threads(0);
        assert_eq!(cfg.search_threads, 1);
    }
}
