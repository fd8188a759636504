//! Protobuf pass-configuration messages via prost derive.
//!
//! A `Config` is an ordered list of named passes; each pass carries exactly
//! one kind-specific options record. The driver validates and converts these
//! into the native option structs before dispatch.

use prost::Message;

pub use stratum_ir::proto::{Affine, Location};

/// Options for passes that only select blocks by tag.
#[derive(Clone, PartialEq, Message)]
pub struct GenericPass {
    #[prost(string, repeated, tag = "1")]
    pub reqs: Vec<String>,
}

/// Options for the `locate_*` passes.
#[derive(Clone, PartialEq, Message)]
pub struct LocatePass {
    #[prost(string, repeated, tag = "1")]
    pub reqs: Vec<String>,
    #[prost(message, optional, tag = "2")]
    pub loc: Option<Location>,
}

/// Options for the cache pass. `dirs` uses `Refinement.dir` values.
#[derive(Clone, PartialEq, Message)]
pub struct CachePass {
    #[prost(string, repeated, tag = "1")]
    pub reqs: Vec<String>,
    #[prost(int32, repeated, tag = "2")]
    pub dirs: Vec<i32>,
    #[prost(message, optional, tag = "3")]
    pub mem_loc: Option<Location>,
    #[prost(message, optional, tag = "4")]
    pub xfer_loc: Option<Location>,
}

/// Options for the schedule pass.
#[derive(Clone, PartialEq, Message)]
pub struct SchedulePass {
    #[prost(string, repeated, tag = "1")]
    pub reqs: Vec<String>,
    #[prost(message, optional, tag = "2")]
    pub mem_loc: Option<Location>,
    #[prost(uint64, tag = "3")]
    pub mem_kib: u64,
    #[prost(uint64, tag = "4")]
    pub alignment: u64,
    #[prost(message, optional, tag = "5")]
    pub xfer_loc: Option<Location>,
}

/// One configured pass: a display name plus its kind.
#[derive(Clone, PartialEq, Message)]
pub struct Pass {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(oneof = "pass::Kind", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10")]
    pub kind: Option<pass::Kind>,
}

/// Nested types for [`Pass`].
pub mod pass {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Cache(super::CachePass),
        #[prost(message, tag = "3")]
        Schedule(super::SchedulePass),
        #[prost(message, tag = "4")]
        ComputeDeps(super::GenericPass),
        #[prost(message, tag = "5")]
        Localize(super::GenericPass),
        #[prost(message, tag = "6")]
        LocateBlock(super::LocatePass),
        #[prost(message, tag = "7")]
        LocateInnerBlock(super::LocatePass),
        #[prost(message, tag = "8")]
        LocateMemory(super::LocatePass),
        #[prost(message, tag = "9")]
        PruneIdxs(super::GenericPass),
        #[prost(message, tag = "10")]
        PruneRefs(super::GenericPass),
    }
}

/// An ordered pass pipeline.
#[derive(Clone, PartialEq, Message)]
pub struct Config {
    #[prost(message, repeated, tag = "1")]
    pub passes: Vec<Pass>,
}
