//! Client for the TSRNG (time-sandwich RNG) round service.
//!
//! | Module          | Purpose                                                 |
//! |-----------------|---------------------------------------------------------|
//! | `orchestrator`  | Drives one round: collect → beacon → finalize → range → extras |
//! | `encoding`      | Classifies pasted sequences for `/analysis/sequence`    |
//! | `service`       | Collaborator trait, wire types, reqwest implementation  |
//! | `state_machine` | Round stages and legal transitions                      |
//! | `round`         | Round parameters, seed, published state, run result     |
//! | `artifact`      | Revocable handles to downloaded output                  |
//! | `errors`        | Error taxonomy and service error normalization          |
//! | `config`        | Service endpoint configuration                          |

pub mod artifact;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod orchestrator;
pub mod round;
pub mod service;
pub mod state_machine;

pub use encoding::{classify, EncodingError, EncodingPayload, SequenceData};
pub use errors::{FailureClass, OrchestrationError, ServiceError};
pub use orchestrator::RoundOrchestrator;
pub use round::{BestEffortStep, OutputLength, RoundConfig, RoundState, RunResult};
pub use state_machine::RoundStage;
