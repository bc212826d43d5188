//! # Listing Harvester
//!
//! Partitioned, rate-limited harvesting of real-estate listings into flat
//! CSV datasets.
//!
//! Search sources cap how deep a single query can page. The harvester splits
//! the query space into price bands, pages through each band with bounded
//! retries, flattens the nested location and category hierarchies of every
//! record into named columns, and writes one CSV per band before merging
//! them into the final dataset.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ Planner  │──▶│  Paginator  │──▶│ Normalizer│──▶│  CsvSink   │──▶│  merged  │
//! │ bands    │   │ API / Page  │   │ flat rows │   │ per band   │   │  dataset │
//! └──────────┘   └──────┬──────┘   └───────────┘   └────────────┘   └──────────┘
//!                       │
//!                ┌──────┴──────┐
//!                │  Transport  │  retry + backoff
//!                └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest plan                  # show price bands and filters
//! harvest run api               # harvest every band from the search API
//! harvest run page              # harvest the rendered search page
//! harvest consolidate           # re-merge the latest day's band files
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy per pipeline stage |
//! | [`transport`] | HTTP requests with retry and backoff |
//! | [`traits`] | Source and sink seams |
//! | [`source_api`] | Structured search-API source |
//! | [`source_page`] | Server-rendered search page source |
//! | [`fetch`] | Lazy page-by-page fetching |
//! | [`partition`] | Price-band partition plans |
//! | [`models`] | Raw listing and partition data types |
//! | [`normalize`] | Raw listing → flat record |
//! | [`sink`] | CSV unit writer and consolidator |
//! | [`harvest`] | Run orchestration with per-partition isolation |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod error;
pub mod fetch;
pub mod harvest;
pub mod models;
pub mod normalize;
pub mod partition;
pub mod sink;
pub mod source_api;
pub mod source_page;
pub mod traits;
pub mod transport;
