use arcstr::ArcStr;
use indexmap::IndexMap;

use cbd::problem::{Analysis, Corner, Corners, DesignParam, Head, Measure, Problem, Requirement};
use cbd::simulator::Simulators;

pub mod amplifier;

use amplifier::Amplifier;

/// An amplifier whose gain must be at least 10 in corners `fast` (`k = 1.5`)
/// and `slow` (`k = 1`), with `x` in `[1, 20]` starting at 8.
pub fn amplifier_problem() -> Problem {
    Problem {
        heads: IndexMap::from_iter([(arcstr::literal!("spice"), Head::new("amp").param("k", 1.0))]),
        analyses: IndexMap::from_iter([
            (arcstr::literal!("op"), Analysis::new("spice").command("op")),
            (arcstr::literal!("ac"), Analysis::new("spice").command("ac")),
        ]),
        measures: IndexMap::from_iter([
            (arcstr::literal!("gain"), Measure::new("op", "gain")),
            (arcstr::literal!("bw"), Measure::new("ac", "bw")),
        ]),
        corners: Corners::Explicit(IndexMap::from_iter([
            (arcstr::literal!("fast"), Corner::new().param("k", 1.5)),
            (arcstr::literal!("slow"), Corner::new().param("k", 1.0)),
        ])),
        params: IndexMap::from_iter([(
            arcstr::literal!("x"),
            DesignParam {
                lo: 1.0,
                hi: 20.0,
                init: 8.0,
            },
        )]),
        requirements: IndexMap::from_iter([(arcstr::literal!("gain"), Requirement::above(10.0))]),
        ..Default::default()
    }
}

/// Registers `amp` under the simulator id the amplifier problem uses.
pub fn simulators(amp: &Amplifier) -> Simulators {
    Simulators::new().with("amp", amp.clone())
}

pub fn params<const N: usize>(params: [(&str, f64); N]) -> IndexMap<ArcStr, f64> {
    params
        .into_iter()
        .map(|(name, value)| (ArcStr::from(name), value))
        .collect()
}
