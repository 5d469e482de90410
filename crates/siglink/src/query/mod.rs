// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 siglink.dev

//! Discovery query construction and validation.
//!
//! Inlets look for outlets with an XPath predicate over the stream metadata,
//! e.g. `name='BioSemi' and type='EEG'`. Outlets evaluate the predicate; the
//! resolver only has to *build* well-formed queries and reject malformed
//! ones before any datagram is sent.

pub mod parser;

use crate::config::ApiConfig;
use crate::{Error, Result};
use std::fmt;

pub use parser::{parse_predicate, Expr, Operand, Operator};

/// Errors produced while validating a discovery predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The predicate was empty or all-whitespace.
    Empty,
    /// The predicate could not be parsed.
    Parse(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Empty => write!(f, "empty predicate"),
            QueryError::Parse(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Validate a discovery query, failing before any network activity.
///
/// # Errors
///
/// Returns [`Error::InvalidQuery`] if the predicate does not parse.
pub fn check_query(query: &str) -> Result<()> {
    parse_predicate(query)
        .map(|_| ())
        .map_err(|err| Error::InvalidQuery(format!("invalid query '{query}': {err}")))
}

/// Build the standard discovery query for the current session.
///
/// The query always begins with `session_id='<sid>'`; a predicate name (or a
/// full predicate) and an optional value are conjoined with ` and `.
///
/// # Errors
///
/// Returns [`Error::ConfigParse`] if the configuration store cannot be
/// built.
pub fn build_query(pred_or_prop: Option<&str>, value: Option<&str>) -> Result<String> {
    let cfg = ApiConfig::instance()?;
    Ok(compose_query(cfg.session_id(), pred_or_prop, value))
}

fn compose_query(session_id: &str, pred_or_prop: Option<&str>, value: Option<&str>) -> String {
    let mut query = format!("session_id='{session_id}'");
    if let Some(pred) = pred_or_prop {
        query.push_str(" and ");
        query.push_str(pred);
        if let Some(value) = value {
            query.push_str("='");
            query.push_str(value);
            query.push('\'');
        }
    }
    query
}
