//! Domain Layer
//!
//! Core provider types with no transport or runtime dependencies.
//!
//! - `types`: identifiers, domain types, message keys and quality of service
//! - `state`: stream/data state and status codes carried on responses
//! - `message`: inbound requests and posts, outbound responses
//! - `reject`: request rejection reasons and their status mapping
//! - `directory`: the single service this provider advertises
//! - `payload`: simulated item data per domain
//! - `symbol_list`: membership table behind the symbol list item
//! - `registry`: request slots and shared item records

pub mod directory;
pub mod message;
pub mod payload;
pub mod registry;
pub mod reject;
pub mod state;
pub mod symbol_list;
pub mod types;
