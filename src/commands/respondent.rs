use clap::{Args, Subcommand, ValueEnum};
use sqlx::SqlitePool;
use std::io::{self, Write};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Filter, IdentityLinkRepository, Record, Repository, Value};
use crate::models::Respondent;
use crate::sync::ApiClient;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct RespondentCommand {
    #[command(subcommand)]
    pub command: RespondentSubcommand,
}

#[derive(Subcommand)]
pub enum RespondentSubcommand {
    /// Enroll a new respondent
    Add {
        /// First name
        first_name: String,

        /// Last name
        last_name: String,

        /// Status to record (can be repeated)
        #[arg(long = "status", value_name = "STATUS")]
        statuses: Vec<String>,

        /// Nickname
        #[arg(long)]
        nickname: Option<String>,

        /// Year of birth
        #[arg(long)]
        birth_year: Option<i64>,

        /// Gender
        #[arg(long)]
        gender: Option<String>,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Organization id (from the reference cache)
        #[arg(long)]
        organization: Option<i64>,

        /// Project id (from the reference cache)
        #[arg(long)]
        project: Option<i64>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List local respondents
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only respondents not yet uploaded
        #[arg(long)]
        unsynced: bool,
    },

    /// Show a respondent's details
    Show {
        /// Respondent UUID
        uuid: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Search local respondents by name
    Search {
        /// Search term
        term: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a local respondent
    Delete {
        /// Respondent UUID
        uuid: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Search respondents on the server
    Browse {
        /// Search term
        term: String,

        /// Result page (starts at 1)
        #[arg(long, default_value = "1")]
        page: u32,
    },
}

impl RespondentCommand {
    pub async fn run(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let repo = Repository::new(pool.clone(), "respondents")?;
        let statuses_repo = Repository::new(pool.clone(), "respondent_statuses")?;
        let links = IdentityLinkRepository::new(pool.clone());

        match &self.command {
            RespondentSubcommand::Add {
                first_name,
                last_name,
                statuses,
                nickname,
                birth_year,
                gender,
                phone,
                email,
                organization,
                project,
                notes,
            } => {
                if first_name.trim().is_empty() || last_name.trim().is_empty() {
                    return Err("First and last name cannot be empty".into());
                }

                let mut respondent = Respondent::new(first_name.trim(), last_name.trim());

                if let Some(nickname) = nickname {
                    respondent = respondent.with_nickname(nickname);
                }
                if let Some(year) = birth_year {
                    respondent = respondent.with_birth_year(*year);
                }
                if let Some(gender) = gender {
                    respondent = respondent.with_gender(gender);
                }
                if let Some(phone) = phone {
                    respondent = respondent.with_phone(phone);
                }
                if let Some(email) = email {
                    respondent = respondent.with_email(email);
                }
                if let Some(organization_id) = organization {
                    respondent = respondent.with_organization(*organization_id);
                }
                if let Some(project_id) = project {
                    respondent = respondent.with_project(*project_id);
                }
                if let Some(notes) = notes {
                    respondent = respondent.with_notes(notes);
                }
                if !statuses.is_empty() {
                    respondent = respondent.with_statuses(statuses.clone());
                }

                repo.save(&respondent.to_record(), None, "id").await?;
                for status in &respondent.statuses {
                    statuses_repo
                        .save(&status_record(&respondent.uuid, status), None, "id")
                        .await?;
                }
                links.register(&respondent.uuid.to_string()).await?;

                println!("Enrolled respondent:");
                println!("{}", respondent);
                Ok(())
            }

            RespondentSubcommand::List { format, unsynced } => {
                let rows = if *unsynced {
                    repo.filter(&[("synced", Filter::Eq(Value::from(false)))])
                        .await?
                } else {
                    repo.filter(&[]).await?
                };

                if rows.is_empty() {
                    println!("No respondents found");
                    return Ok(());
                }

                let respondents: Vec<Respondent> =
                    rows.iter().filter_map(Respondent::from_record).collect();

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&respondents)?);
                    }
                    OutputFormat::Text => {
                        print_table(&respondents);
                        println!("\nTotal: {} respondent(s)", respondents.len());
                    }
                }
                Ok(())
            }

            RespondentSubcommand::Show { uuid, format } => {
                let row = repo.find_by("uuid", &Value::from(uuid.as_str())).await?;
                let row = match row {
                    Some(row) => row,
                    None => return Err(format!("Respondent not found: {}", uuid).into()),
                };

                let mut respondent = Respondent::from_record(&row)
                    .ok_or_else(|| format!("Stored respondent {} is malformed", uuid))?;
                respondent.statuses = load_statuses(&statuses_repo, uuid).await?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&respondent)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", respondent);
                        if let Some(link) = links.find_by_uuid(uuid).await? {
                            if let Some(server_id) = link.server_id {
                                println!("Server ID: {}", server_id);
                            }
                        }
                    }
                }
                Ok(())
            }

            RespondentSubcommand::Search { term, format } => {
                let rows = repo.search(term).await?;
                if rows.is_empty() {
                    println!("No respondents matched '{}'", term);
                    return Ok(());
                }

                let respondents: Vec<Respondent> =
                    rows.iter().filter_map(Respondent::from_record).collect();

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&respondents)?);
                    }
                    OutputFormat::Text => {
                        print_table(&respondents);
                        println!("\nTotal: {} match(es)", respondents.len());
                    }
                }
                Ok(())
            }

            RespondentSubcommand::Delete { uuid, force } => {
                let row = repo.find_by("uuid", &Value::from(uuid.as_str())).await?;
                let row = match row {
                    Some(row) => row,
                    None => return Err(format!("Respondent not found: {}", uuid).into()),
                };
                let respondent = Respondent::from_record(&row)
                    .ok_or_else(|| format!("Stored respondent {} is malformed", uuid))?;

                if !force {
                    print!("Delete respondent '{}'? [y/N] ", respondent.full_name());
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                // Interactions protect the respondent; the store refuses the
                // delete and the message names the blocking relationship.
                repo.delete(&Value::from(uuid.as_str()), "uuid").await?;
                println!("Deleted respondent: {}", respondent.full_name());
                Ok(())
            }

            RespondentSubcommand::Browse { term, page } => {
                let client = ApiClient::from_config(&config.sync)?;
                let results = client.search_respondents(term, *page).await?;

                if results.results.is_empty() {
                    println!("No server matches for '{}' on page {}", term, page);
                    return Ok(());
                }

                println!("{:<8}  {:<30}  {:<6}  GENDER", "ID", "NAME", "BORN");
                println!("{}", "-".repeat(60));
                for hit in &results.results {
                    println!(
                        "{:<8}  {:<30}  {:<6}  {}",
                        hit.id,
                        hit.full_name(),
                        hit.birth_year.map_or(String::new(), |y| y.to_string()),
                        hit.gender.as_deref().unwrap_or("")
                    );
                }
                if results.has_more {
                    println!("\nMore matches exist; rerun with --page {}", page + 1);
                }
                Ok(())
            }
        }
    }
}

fn status_record(respondent_uuid: &Uuid, status: &str) -> Record {
    Record::from([
        (
            "respondent_uuid".to_string(),
            Value::from(*respondent_uuid),
        ),
        ("status".to_string(), Value::from(status)),
        ("synced".to_string(), Value::from(false)),
    ])
}

async fn load_statuses(
    statuses_repo: &Repository,
    uuid: &str,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let rows = statuses_repo
        .filter(&[("respondent_uuid", Filter::Eq(Value::from(uuid)))])
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("status").and_then(Value::as_text))
        .map(String::from)
        .collect())
}

fn print_table(respondents: &[Respondent]) {
    println!("{:<36}  {:<24}  {:<10}  SYNCED", "UUID", "NAME", "CREATED");
    println!("{}", "-".repeat(80));
    for respondent in respondents {
        println!(
            "{:<36}  {:<24}  {:<10}  {}",
            respondent.uuid,
            short_name(&respondent.full_name()),
            respondent.created_on.to_string(),
            if respondent.synced { "yes" } else { "no" }
        );
    }
}

/// Shortens a name to the table's column width. The limit counts characters,
/// not bytes, so accented names never split mid-character.
fn short_name(name: &str) -> String {
    if name.chars().count() > 24 {
        let mut short: String = name.chars().take(21).collect();
        short.push_str("...");
        short
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_keeps_names_within_width() {
        assert_eq!(short_name("Amara Diallo"), "Amara Diallo");
        // 22 characters but 43 bytes; the width check counts characters.
        assert_eq!(
            short_name("Παπαδόπουλος Παναγιώτα"),
            "Παπαδόπουλος Παναγιώτα"
        );
    }

    #[test]
    fn test_short_name_truncates_on_character_boundaries() {
        assert_eq!(
            short_name("Konstantina Papadopoulou-Georgiou"),
            "Konstantina Papadopou..."
        );
        assert_eq!(
            short_name("Ευαγγελία Παπακωνσταντίνου"),
            "Ευαγγελία Παπακωνσταν..."
        );
    }
}
