//! pagecarbon estimates the carbon cost of loading a web page.
//!
//! A headless Chromium session loads the page while a network tap meters
//! every transfer. Discovered interactive elements are exercised and
//! common visitor behaviors replayed so lazy-loaded and interaction-gated
//! resources are counted too. The metered bytes are classified by kind
//! and handed to an emissions model.
//!
//! The pipeline lives in [`orchestrator::run_analysis`]; the crates under
//! `crates/` carry the session plumbing, the tap, discovery, interaction
//! and classification.

pub mod cache;
pub mod emissions;
pub mod errors;
pub mod orchestrator;
pub mod report;

pub use crate::cache::{AnalysisCache, InMemoryCache, NoopCache};
pub use crate::emissions::{
    EmissionsModel, GreenHostingCheck, StaticGreenHosting, SustainableWebModel,
};
pub use crate::errors::AnalysisError;
pub use crate::orchestrator::{run_analysis, AnalysisRuntime};
pub use crate::report::{AnalysisResult, InteractionSummary};

pub use pagecarbon_core_types::{AnalysisOptions, DeviceType, InteractionLevel};
