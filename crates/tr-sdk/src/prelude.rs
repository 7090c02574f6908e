//! Re-exports for convenience
//!
//! Import everything you need with:
//! ```
//! use tr_sdk::prelude::*;
//! ```

// Client
pub use crate::builder::{ClientConfig, ConfigError, TimelineClientBuilder};
pub use crate::client::TimelineClient;
pub use crate::enricher::{EnrichConfig, Enricher};
pub use crate::link::Link;
pub use crate::paginator::{PaginationConfig, Paginator};

// Types from tr-types
pub use tr_types::{
    Amount, DetailFailure, DetailFetchWarning, EnrichedTransaction, Page, RawTransaction, Session,
    Topic, TransactionDetail, TransactionSet,
    // Errors
    AuthError, ConnectionError, TrError,
};

// Connection types
pub use tr_ws::{
    CallMode, CallOptions, Connection, ConnectionConfig, ConnectionState, Connector, Endpoint,
    RetryPolicy, WsConnector,
};

// Login and session types
pub use tr_auth::{
    AuthState, Authenticator, Challenge, Credentials, HttpLoginApi, LoginApi, LoginConfig,
    SecondFactorInput, SecondFactorPrompt, SessionManager, TokenSource,
};

// Decimal for amounts
pub use tr_types::Decimal;
