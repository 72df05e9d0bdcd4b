//! Anti-detection behavior: request profiles, human-like timing, and the
//! randomness both draw from

pub mod profile;
pub mod random;
pub mod timing;

pub use profile::{BrowserFamily, FingerprintSeed, ProfileGenerator, ProfileRotator, RequestProfile};
pub use random::{RandomSource, SeededRandom, SequenceRandom, ThreadRandom};
pub use timing::{HumanTiming, ReaderProfile};
