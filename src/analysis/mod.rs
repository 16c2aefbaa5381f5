/// Signal processing for scale-versus-reference validation.
///
/// Each submodule is a pure transformation over `model::Series` or
/// `model::AlignedPair`. None of them touch the filesystem; loading and
/// orchestration live in `ingest` and `pipeline`.
///
/// Submodules:
/// - `smoothing`: centered/causal moving average and local polynomial filter.
/// - `lag`      : lag sweep, best-lag selection and series shifting.
/// - `thermal`  : linear temperature-drift calibration and correction.
/// - `neutron`  : neutron probe counts to SWE.
/// - `align`    : nearest-timestamp pairing of two sampling rates.
/// - `agreement`: error metrics, R² and Bland-Altman limits.
/// - `numeric`  : shared statistics helpers.

pub mod agreement;
pub mod align;
pub mod lag;
pub mod neutron;
pub mod numeric;
pub mod smoothing;
pub mod thermal;
