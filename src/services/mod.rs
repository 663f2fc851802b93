pub mod cancel;
pub mod catalog;
pub mod csv_rows;
pub mod dataset_importer;
pub mod fetcher;
pub mod importer;
pub mod job_store;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod queue;
pub mod storage;
pub mod validator;
pub mod worker;
