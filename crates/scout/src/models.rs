//! These models represent the objects passed around by the agent
//!
//! There are several related formats we need to interact with:
//! - the invocation payload, sent from the caller to the entry adapter
//! - the streamed response events, sent from the agent back to the caller
//! - chat-completions messages/tools, sent from the agent to the LLM
//! - retrieval requests, sent from the agent to the knowledge base
//!
//! These overlap to varying degrees. We always immediately convert external
//! data into the internal structs using to/from helpers, so the internal
//! models are not an exact match to any single wire format.
pub mod message;
pub mod role;
pub mod tool;
