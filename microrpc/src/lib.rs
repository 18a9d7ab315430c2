#![forbid(unsafe_code)]

//! A small binary RPC framework.
//!
//! Services are plain traits annotated with [`service`]. The macro generates
//! a registration method for the server side and a typed client stub that
//! turns each method into a request frame sent over a pooled connection.

pub use microrpc_macro::service;

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod msg;
pub use msg::{Meta, Request, Response};

pub mod serializer;
pub use serializer::{
    JsonSerializer, MessagePackSerializer, Serializer, SerializerExt, SerializerRegistry,
};

mod context;
pub use context::Context;

mod reply;
pub use reply::Reply;

mod socket;
pub use socket::{Connection, read_frame, write_frame};

pub mod pool;
pub use pool::{Pool, PoolConfig, PoolStats, Pooled};

pub mod tcp;

mod task_supervisor;
pub use task_supervisor::{TaskGuard, TaskSupervisor};

mod router;
pub use router::{Method, Router};

mod listener;
pub use listener::Listener;

mod client;
pub use client::{CallOptions, Client, ClientConfig};

mod server;
pub use server::Server;
