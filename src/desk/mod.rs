//! Repair desk: ticket intake, admin triage, and LINE postback handling.
//!
//! ## Overview
//!
//! Staff submit repair requests over HTTP; each new ticket is announced to a
//! LINE group with accept/reject postback buttons. Technicians tap a button,
//! LINE calls the webhook, and the ticket moves along
//! `pending → in-progress → completed | rejected`. Administrators list,
//! edit, delete and export tickets behind a signed session cookie.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Forms / │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ dashboard│ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │   auth.rs  (AdminSession extractor)    │
//!                       │         │   export.rs (CSV / JSON download)      │
//! ┌──────────┐ postback │         │                                        │
//! │   LINE   │ ───────> │  webhook.rs  (signature check, apply_postback)   │
//! │ platform │ <─────── │  line.rs     (reply / push / Notify client)      │
//! └──────────┘          │         │                                        │
//!                       │         │ persist_ticket_update()                │
//!                       │         v                                        │
//!                       │  status_update.rs  (drop unknown column, retry)  │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  store.rs  (TicketStore trait)                   │
//!                       │    ├─ db.rs        (SQLite via DbHandle)         │
//!                       │    └─ postgrest.rs (hosted REST table)           │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Typical Request Flow (technician accepts a job)
//!
//! 1. `POST /api/line/interactions` → `webhook::line_webhook()` verifies
//!    `x-line-signature` against the raw body.
//! 2. Each `approve_job:<id>` postback goes to `webhook::apply_postback()`,
//!    which loads the ticket and checks the transition.
//! 3. `status_update::persist_ticket_update()` writes the patch keyed by
//!    `job_id`, falling back to `id`, and drops columns the table lacks.
//! 4. The technician gets a reply; the admin recipient gets a push.

pub mod api;
pub mod auth;
pub mod db;
pub mod export;
pub mod line;
pub mod models;
pub mod postgrest;
pub mod server;
pub mod status_update;
pub mod store;
pub mod webhook;
