//! # PDF Chat
//!
//! Upload a PDF, then ask questions about it. Each upload becomes a
//! session owned by the authenticated user; answers are generated from the
//! chunks of that PDF most similar to the question.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Extract→Chunk→Embed  │──▶│ Vector index │
//! │  (PDF)   │   │     (pdf, chunk)     │   │  per session │
//! └──────────┘   └──────────────────────┘   └──────┬───────┘
//!                                                  │
//! ┌──────────┐   ┌──────────────────────┐          │
//! │ Question │──▶│ Embed→Top-k→Prompt   │◀─────────┘
//! │          │   │  (chat, llm)         │──▶ answer + sources
//! └──────────┘   └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//! export SUPABASE_URL=https://<project>.supabase.co SUPABASE_KEY=...
//! pdf-chat serve                  # HTTP API on 0.0.0.0:8000
//! pdf-chat sessions --user <id>   # inspect the session registry
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`observability`] | `tracing` subscriber setup |
//! | [`models`] | Core data types |
//! | [`provider`] | Shared HTTP retry for model providers |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat-completion provider abstraction |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Recursive character text splitter |
//! | [`index`] | Per-session persisted vector index |
//! | [`pdf`] | Upload processing pipeline |
//! | [`chat`] | Retrieval-augmented answering |
//! | [`sessions`] | Session ownership registry |
//! | [`auth`] | Identity provider gateway and token verification |
//! | [`server`] | HTTP API |

pub mod auth;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod llm;
pub mod models;
pub mod observability;
pub mod pdf;
pub mod provider;
pub mod server;
pub mod sessions;
