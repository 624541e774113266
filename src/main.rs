//! # hierarag CLI (`hrag`)
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag init` | Create the SQLite database and run schema migrations |
//! | `hrag ingest <path>` | Ingest a file or directory |
//! | `hrag list` | List documents |
//! | `hrag get <id>` / `hrag delete <id>` | Show or delete a document |
//! | `hrag search "<query>"` | Ranked, optionally personalized search |
//! | `hrag ask "<question>"` | Cited answer with reasoning and uncertainty |
//! | `hrag graph show` / `graph rebuild` | Inspect or rebuild knowledge graphs |
//! | `hrag embed pending` / `embed rebuild` | Backfill or regenerate vectors |
//! | `hrag profile show\|set <user>` | Read or update a user profile |
//! | `hrag memory show <user>` | Show a user's conversation memory |
//! | `hrag stats` | Index overview |
//! | `hrag serve` | Start the HTTP API |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use hierarag::ask::{run_ask, AskRequest};
use hierarag::config::load_config;
use hierarag::logging::init_logging;
use hierarag::profile_cmd::{run_memory_show, run_profile_set, run_profile_show, ProfileUpdate};
use hierarag::search::{run_search, SearchRequest};
use hierarag::{embed_cmd, get, graph_cmd, ingest, migrate, server, stats};
use hierarag_core::profile::DetailLevel;
use hierarag_core::retrieve::SearchMode;
use hierarag_core::store::SearchFilter;

/// hierarag: personalized hierarchical retrieval over local documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "hierarag: hierarchical chunking, knowledge graphs, and personalized retrieval with cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Filters shared by `search` and `ask`.
#[derive(clap::Args)]
struct FilterArgs {
    /// Only documents owned by this user.
    #[arg(long)]
    owner: Option<String>,

    /// Only documents carrying one of these tags (repeatable).
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Only documents in this language (e.g. `en`).
    #[arg(long)]
    language: Option<String>,

    /// Only documents updated at or after this Unix timestamp.
    #[arg(long)]
    since: Option<i64>,

    /// Also match parent chunks.
    #[arg(long)]
    include_parents: bool,
}

impl FilterArgs {
    fn into_filter(self) -> SearchFilter {
        SearchFilter {
            owner_id: self.owner,
            tags: self.tags,
            language: self.language,
            since: self.since,
            include_parents: self.include_parents,
            ..SearchFilter::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a file or every supported file under a directory.
    ///
    /// Re-ingesting a file updates the same document; unchanged files are
    /// skipped.
    Ingest {
        path: PathBuf,

        /// Owner recorded on the documents (defaults to `[ingest].default_owner`).
        #[arg(long)]
        owner: Option<String>,

        /// Comma-separated tags, used as expertise domains.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// List documents.
    List {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Print a document with its metadata and chunks.
    Get { id: String },

    /// Delete a document with its chunks, vectors, and graph.
    Delete { id: String },

    /// Search indexed documents.
    Search {
        query: String,

        /// `keyword`, `semantic`, or `hybrid`. Defaults to `[retrieval].default_mode`.
        #[arg(long)]
        mode: Option<SearchMode>,

        #[arg(long)]
        limit: Option<usize>,

        /// Personalize ranking for this user.
        #[arg(long)]
        user: Option<String>,

        /// Print the score breakdown for each result.
        #[arg(long)]
        explain: bool,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Personalize and record the exchange in this user's memory.
        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        mode: Option<SearchMode>,

        /// Chunks to retrieve as evidence.
        #[arg(long)]
        limit: Option<usize>,

        /// `brief`, `standard`, or `detailed`. Overrides the profile.
        #[arg(long)]
        detail: Option<DetailLevel>,

        /// Print the full answer as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Knowledge graph commands.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// User profile commands.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Conversation memory commands.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum GraphAction {
    /// Print the merged graph, or one document's graph with `--doc`.
    Show {
        #[arg(long)]
        doc: Option<String>,

        /// Entities to print, most important first.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Re-extract every complete document's graph from its stored chunks.
    Rebuild,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override `[embedding].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without embedding anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print a profile (defaults when none is stored).
    Show { user: String },

    /// Update selected profile fields.
    Set {
        user: String,

        /// Personalization level in [0, 1].
        #[arg(long)]
        level: Option<f64>,

        #[arg(long)]
        detail: Option<DetailLevel>,

        #[arg(long)]
        examples: Option<bool>,

        /// Comma-separated preferred domains.
        #[arg(long, value_delimiter = ',')]
        prefer: Option<Vec<String>>,

        /// `domain=level` pairs (repeatable).
        #[arg(long = "expertise", value_parser = parse_expertise)]
        expertise: Vec<(String, f64)>,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    Show {
        user: String,

        #[arg(long)]
        json: bool,
    },
}

/// Parse a `domain=level` pair for `--expertise`.
fn parse_expertise(s: &str) -> Result<(String, f64), String> {
    let (domain, level) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid DOMAIN=LEVEL: no '=' found in '{}'", s))?;
    let level: f64 = level
        .trim()
        .parse()
        .map_err(|_| format!("invalid level in '{}'", s))?;
    Ok((domain.trim().to_string(), level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, owner, tags } => {
            ingest::run_ingest(&cfg, &path, owner.as_deref(), &tags).await?;
        }
        Commands::List { owner } => {
            get::run_list(&cfg, owner.as_deref()).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            get::run_delete(&cfg, &id).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            user,
            explain,
            filter,
        } => {
            run_search(
                &cfg,
                SearchRequest {
                    query,
                    mode,
                    limit,
                    user_id: user,
                    filter: filter.into_filter(),
                    explain,
                },
            )
            .await?;
        }
        Commands::Ask {
            question,
            user,
            mode,
            limit,
            detail,
            json,
            filter,
        } => {
            run_ask(
                &cfg,
                AskRequest {
                    question,
                    user_id: user,
                    mode,
                    limit,
                    filter: filter.into_filter(),
                    detail_level: detail,
                },
                json,
            )
            .await?;
        }
        Commands::Graph { action } => match action {
            GraphAction::Show { doc, limit, json } => {
                graph_cmd::run_graph_show(&cfg, doc.as_deref(), limit, json).await?;
            }
            GraphAction::Rebuild => {
                graph_cmd::run_graph_rebuild(&cfg).await?;
            }
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Profile { action } => match action {
            ProfileAction::Show { user } => {
                run_profile_show(&cfg, &user).await?;
            }
            ProfileAction::Set {
                user,
                level,
                detail,
                examples,
                prefer,
                expertise,
            } => {
                let update = ProfileUpdate {
                    personalization_level: level,
                    detail_level: detail,
                    prefers_examples: examples,
                    preferred_domains: prefer,
                    expertise: expertise.into_iter().collect::<BTreeMap<_, _>>(),
                };
                run_profile_set(&cfg, &user, update).await?;
            }
        },
        Commands::Memory { action } => match action {
            MemoryAction::Show { user, json } => {
                run_memory_show(&cfg, &user, json).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
