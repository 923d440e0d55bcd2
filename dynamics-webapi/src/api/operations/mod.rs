//! Operations module for Dynamics 365 Web API
//!
//! Provides a unified interface for single operations and batch
//! operations: [`Operation`] describes what to do, the assembler turns it
//! into an HTTP call, and the interpreter reads the answer.

pub mod assembler;
pub mod batch;
pub mod interpreter;
pub mod operation;

pub use assembler::{PreparedRequest, assemble, option_headers, process_data};
pub use batch::{
    BatchGroup, BatchOptions, BatchPart, BatchRequest, BatchRequestBuilder, BatchResponseEntry,
    BatchResponseParser,
};
pub use interpreter::{
    Collection, EntityReference, FetchXmlPage, ResponseContext, ResponseKind, ResponseValue,
    error_from_response, interpret,
};
pub use operation::{MetadataOperation, Operation, Request, RequestOptions};
