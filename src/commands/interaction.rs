use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{Filter, IdentityLinkRepository, Repository, Value};
use crate::models::{Interaction, SubcategoryEntry};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct InteractionCommand {
    #[command(subcommand)]
    pub command: InteractionSubcommand,
}

#[derive(Subcommand)]
pub enum InteractionSubcommand {
    /// Record an interaction with a respondent
    Add {
        /// Respondent UUID (local identity)
        #[arg(long, value_name = "UUID")]
        respondent: Option<String>,

        /// Server id of a respondent known from browse
        #[arg(long, value_name = "ID")]
        server_id: Option<i64>,

        /// Task id (from the reference cache)
        #[arg(long)]
        task: Option<i64>,

        /// Date of the interaction (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,

        /// Indicator entry as ID:NAME:VALUE (can be repeated)
        #[arg(long = "subcategory", value_name = "ID:NAME:VALUE")]
        subcategories: Vec<String>,
    },

    /// List local interactions
    List {
        /// Only this respondent's interactions
        #[arg(long, value_name = "UUID")]
        respondent: Option<String>,

        /// Only interactions not yet uploaded
        #[arg(long)]
        unsynced: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl InteractionCommand {
    pub async fn run(&self, pool: &SqlitePool) -> Result<(), Box<dyn std::error::Error>> {
        let repo = Repository::new(pool.clone(), "interactions")?;
        let subcategories_repo = Repository::new(pool.clone(), "interaction_subcategories")?;
        let links = IdentityLinkRepository::new(pool.clone());

        match &self.command {
            InteractionSubcommand::Add {
                respondent,
                server_id,
                task,
                date,
                notes,
                subcategories,
            } => {
                let respondent_uuid = match (respondent, server_id) {
                    (Some(_), Some(_)) => {
                        return Err("Provide either --respondent or --server-id, not both".into())
                    }
                    (None, None) => {
                        return Err("Provide --respondent or --server-id".into());
                    }
                    (Some(uuid), None) => {
                        let uuid = Uuid::parse_str(uuid)
                            .map_err(|_| format!("Invalid respondent uuid: {}", uuid))?;
                        let known_locally = Repository::new(pool.clone(), "respondents")?
                            .find_by("uuid", &Value::from(uuid))
                            .await?
                            .is_some()
                            || links.find_by_uuid(&uuid.to_string()).await?.is_some();
                        if !known_locally {
                            return Err(format!("Respondent not found: {}", uuid).into());
                        }
                        uuid
                    }
                    (None, Some(server_id)) => {
                        // Mints a local identity the first time this server
                        // respondent is referenced from this device.
                        let link = links.ensure_for_server_id(*server_id).await?;
                        Uuid::parse_str(&link.client_uuid)
                            .map_err(|_| format!("Corrupt identity link for {}", server_id))?
                    }
                };

                let mut interaction = Interaction::new(respondent_uuid);
                if let Some(task_id) = task {
                    interaction = interaction.with_task(*task_id);
                }
                if let Some(date) = date {
                    interaction = interaction.with_occurred_on(*date);
                }
                if let Some(notes) = notes {
                    interaction = interaction.with_notes(notes);
                }

                let mut entries = Vec::new();
                for raw in subcategories {
                    entries.push(parse_subcategory(raw)?);
                }
                interaction = interaction.with_subcategories(entries);

                repo.save(&interaction.to_record(), None, "id").await?;
                for entry in &interaction.subcategories {
                    subcategories_repo
                        .save(&entry.to_record(interaction.uuid), None, "id")
                        .await?;
                }

                println!("Recorded interaction:");
                println!("{}", interaction);
                Ok(())
            }

            InteractionSubcommand::List {
                respondent,
                unsynced,
                format,
            } => {
                let mut conditions = Vec::new();
                if let Some(uuid) = respondent {
                    conditions.push(("respondent_uuid", Filter::Eq(Value::from(uuid.as_str()))));
                }
                if *unsynced {
                    conditions.push(("synced", Filter::Eq(Value::from(false))));
                }

                let rows = repo.filter(&conditions).await?;
                if rows.is_empty() {
                    println!("No interactions found");
                    return Ok(());
                }

                let mut interactions = Vec::new();
                for row in &rows {
                    let mut interaction = match Interaction::from_record(row) {
                        Some(interaction) => interaction,
                        None => continue,
                    };
                    let entries = subcategories_repo
                        .filter(&[(
                            "interaction_uuid",
                            Filter::Eq(Value::from(interaction.uuid)),
                        )])
                        .await?;
                    interaction.subcategories = entries
                        .iter()
                        .filter_map(SubcategoryEntry::from_record)
                        .collect();
                    interactions.push(interaction);
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&interactions)?);
                    }
                    OutputFormat::Text => {
                        for interaction in &interactions {
                            println!("{}", interaction);
                        }
                        println!("Total: {} interaction(s)", interactions.len());
                    }
                }
                Ok(())
            }
        }
    }
}

/// Parses an ID:NAME:VALUE subcategory argument.
fn parse_subcategory(raw: &str) -> Result<SubcategoryEntry, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = raw.splitn(3, ':').collect();
    if parts.len() != 3 {
        return Err(format!("Expected ID:NAME:VALUE, got '{}'", raw).into());
    }
    let id: i64 = parts[0]
        .parse()
        .map_err(|_| format!("Subcategory id must be a number in '{}'", raw))?;
    if parts[1].trim().is_empty() {
        return Err(format!("Subcategory name cannot be empty in '{}'", raw).into());
    }
    let value: f64 = parts[2]
        .parse()
        .map_err(|_| format!("Subcategory value must be a number in '{}'", raw))?;
    Ok(SubcategoryEntry::new(id, parts[1].trim(), value))
}
