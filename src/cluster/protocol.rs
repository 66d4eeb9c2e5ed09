//! Request and response types exchanged between a front end, coordinators and replicas.

use bytes::Bytes;

use crate::types::{Cell, Timestamp};

use super::ReplicationFactor;

/// Operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

/// Outcome of a request, modelled on the HTTP status a front end would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A read found live data.
    Ok,
    /// A write reached its quorum.
    Created,
    /// A delete reached its quorum.
    Accepted,
    /// A read found nothing or a tombstone.
    NotFound,
    /// Too few replicas answered in time.
    Timeout,
}

impl Status {
    /// HTTP status code for this outcome.
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::NotFound => 404,
            Status::Timeout => 504,
        }
    }
}

/// A single-key operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub key: Bytes,
    /// Data to store; only used by `Put`.
    pub value: Option<Bytes>,
    /// `None` means a majority of the cluster.
    pub replicas: Option<ReplicationFactor>,
    /// Set when a coordinator forwards the request to a replica; a proxied
    /// request is served locally and never fans out again.
    pub proxied: bool,
}

impl Request {
    pub fn get(key: impl Into<Bytes>) -> Self {
        Self::new(Method::Get, key.into(), None)
    }

    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::new(Method::Put, key.into(), Some(value.into()))
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        Self::new(Method::Delete, key.into(), None)
    }

    fn new(method: Method, key: Bytes, value: Option<Bytes>) -> Self {
        Self {
            method,
            key,
            value,
            replicas: None,
            proxied: false,
        }
    }

    /// Set the replication factor.
    pub fn with_replicas(mut self, replicas: ReplicationFactor) -> Self {
        self.replicas = Some(replicas);
        self
    }

    /// The same operation marked for local execution on a replica.
    pub fn into_proxied(mut self) -> Self {
        self.proxied = true;
        self
    }
}

/// Result of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: Option<Bytes>,
    /// Version timestamp; carried by proxied reads so the coordinator can merge.
    pub timestamp: Option<Timestamp>,
}

impl Response {
    /// A response with a status only.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            body: None,
            timestamp: None,
        }
    }

    /// Encode a versioned value.
    ///
    /// Present data is `Ok` with body and timestamp, a tombstone is
    /// `NotFound` with its timestamp, and an absent key is a bare `NotFound`.
    pub fn from_cell(cell: Cell) -> Self {
        match cell {
            Cell::Present { data, timestamp } => Self {
                status: Status::Ok,
                body: Some(data),
                timestamp: Some(timestamp),
            },
            Cell::Tombstone { timestamp } => Self {
                status: Status::NotFound,
                body: None,
                timestamp: Some(timestamp),
            },
            Cell::Absent => Self::new(Status::NotFound),
        }
    }

    /// Decode a versioned value; `None` if the response does not carry one.
    pub fn into_cell(self) -> Option<Cell> {
        match (self.status, self.body, self.timestamp) {
            (Status::Ok, Some(data), Some(timestamp)) => Some(Cell::present(data, timestamp)),
            (Status::NotFound, None, Some(timestamp)) => Some(Cell::tombstone(timestamp)),
            (Status::NotFound, None, None) => Some(Cell::Absent),
            _ => None,
        }
    }
}
