//! Command-line surface: argument parsing and the `match` and `health` commands.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};

use crate::entities::criteria::{RecruitingStatus, SearchCriteria};
use crate::entities::patient::PatientContext;
use crate::error::TrialMatchError;
use crate::matching::conditions::OncoTreeTrialIndex;
use crate::matching::detail::MatchReport;
use crate::matching::{MatchConfig, MatchSession};
use crate::sources::cbioportal::CBioPortalClient;
use crate::sources::clinicaltrials::CtGovClient;
use crate::sources::oncokb::{OncoKBClient, load_dictionary_file};

pub mod health;

#[derive(Parser, Debug)]
#[command(
    name = "trialmatch",
    version,
    about = "Rank ClinicalTrials.gov studies against a patient's mutations, cancer type, sex and age"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit JSON instead of Markdown
    #[arg(long, global = true)]
    pub json: bool,

    /// Bypass the on-disk HTTP cache
    #[arg(long, global = true)]
    pub no_cache: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the registry for every gene keyword and rank the combined trials
    Match(MatchArgs),
    /// Check connectivity to upstream APIs and the cache directory
    Health {
        /// Skip the local cache directory check
        #[arg(long)]
        apis_only: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct MatchArgs {
    /// Gene symbol searched as its own keyword (repeatable or comma-separated)
    #[arg(long = "gene", value_delimiter = ',')]
    pub genes: Vec<String>,

    /// Gene symbol searched as a keyword and required in every query
    #[arg(long = "required-gene", value_delimiter = ',')]
    pub required_genes: Vec<String>,

    /// Restrict to trials with a site in this country
    #[arg(long = "country")]
    pub countries: Vec<String>,

    /// Restrict to trials with this overall status
    #[arg(long = "status", value_enum, value_delimiter = ',')]
    pub statuses: Vec<RecruitingStatus>,

    /// Patient age in years
    #[arg(long)]
    pub age: Option<u32>,

    /// Patient sex (male, female, all)
    #[arg(long)]
    pub sex: Option<String>,

    /// Patient location, kept with the search criteria
    #[arg(long)]
    pub location: Option<String>,

    /// OncoTree code of the patient's cancer type (repeatable)
    #[arg(long = "condition-code", value_delimiter = ',')]
    pub condition_codes: Vec<String>,

    /// Patient context JSON file
    #[arg(long, conflicts_with_all = ["cbioportal_study", "patient"])]
    pub patient_file: Option<PathBuf>,

    /// cBioPortal study id to load the patient from
    #[arg(long, requires = "patient")]
    pub cbioportal_study: Option<String>,

    /// cBioPortal patient id
    #[arg(long, requires = "cbioportal_study")]
    pub patient: Option<String>,

    /// OncoTree code → trials JSON file used instead of the OncoKB API
    #[arg(long)]
    pub dictionary_file: Option<PathBuf>,

    /// Maximum trials shown
    #[arg(short, long, default_value_t = 25)]
    pub limit: usize,

    /// Keywords retrieved concurrently
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Seconds before a single registry page request is abandoned
    #[arg(long)]
    pub page_timeout: Option<u64>,

    /// Append score explanations, interventions and locations per trial
    #[arg(long)]
    pub details: bool,
}

/// Criteria and condition codes for one run, merged from flags and patient context.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MatchRequest {
    pub criteria: SearchCriteria,
    pub condition_codes: Vec<String>,
}

fn validate_symbols(symbols: &[String]) -> Result<Vec<String>, TrialMatchError> {
    let mut out = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            continue;
        }
        if !crate::sources::is_valid_gene_symbol(symbol) {
            return Err(TrialMatchError::InvalidArgument(format!(
                "Invalid gene symbol '{symbol}'"
            )));
        }
        out.push(symbol.to_string());
    }
    Ok(out)
}

/// Patient-context genes come from files or cBioPortal; odd symbols are
/// skipped so the remaining genes still drive the run.
fn usable_patient_symbols(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| {
            let ok = crate::sources::is_valid_gene_symbol(s);
            if !ok {
                warn!(symbol = %s, "skipping invalid gene symbol from patient context");
            }
            ok
        })
        .map(str::to_string)
        .collect()
}

/// Explicit flags win over patient context. Patient genes become optional
/// keywords only when no gene flag was given.
pub(crate) fn build_request(
    args: &MatchArgs,
    patient: &PatientContext,
) -> Result<MatchRequest, TrialMatchError> {
    let mut optional = validate_symbols(&args.genes)?;
    let required = validate_symbols(&args.required_genes)?;
    if optional.is_empty() && required.is_empty() {
        optional = usable_patient_symbols(&patient.mutated_genes);
    }

    let patient_age = args.age.or(patient.age).ok_or_else(|| {
        TrialMatchError::InvalidArgument(
            "Patient age is required: pass --age or a patient context with an age".into(),
        )
    })?;
    let patient_gender = args
        .sex
        .as_deref()
        .or(patient.sex.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("All")
        .to_string();

    let condition_codes = if args.condition_codes.is_empty() {
        patient.condition_codes.clone()
    } else {
        crate::entities::patient::dedup_trimmed(args.condition_codes.clone())
    };

    let countries = args
        .countries
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>();

    Ok(MatchRequest {
        criteria: SearchCriteria {
            countries,
            recruiting_statuses: args.statuses.iter().copied().collect(),
            required_gene_symbols: required,
            optional_gene_symbols: optional,
            patient_gender,
            patient_location: args.location.clone().unwrap_or_default(),
            patient_age,
        },
        condition_codes,
    })
}

fn match_config(args: &MatchArgs) -> MatchConfig {
    let mut config = MatchConfig::from_env();
    if let Some(n) = args.concurrency.filter(|n| *n > 0) {
        config.keyword_concurrency = n;
    }
    if let Some(secs) = args.page_timeout.filter(|s| *s > 0) {
        config.page_timeout = Duration::from_secs(secs);
    }
    config
}

async fn load_patient(args: &MatchArgs) -> Result<PatientContext, TrialMatchError> {
    if let Some(path) = args.patient_file.as_deref() {
        debug!(path = %path.display(), "loading patient context file");
        return PatientContext::load_from_path(path).await;
    }
    match (args.cbioportal_study.as_deref(), args.patient.as_deref()) {
        (Some(study), Some(patient)) => {
            CBioPortalClient::new()?
                .patient_context(study, patient)
                .await
        }
        _ => Ok(PatientContext::default()),
    }
}

async fn load_dictionary(
    args: &MatchArgs,
    condition_codes: &[String],
) -> Result<OncoTreeTrialIndex, TrialMatchError> {
    if condition_codes.is_empty() {
        return Ok(OncoTreeTrialIndex::default());
    }
    match args.dictionary_file.as_deref() {
        Some(path) => load_dictionary_file(path).await,
        None => OncoKBClient::new()?.fetch_trial_index().await,
    }
}

async fn run_match_command(args: MatchArgs, json: bool) -> anyhow::Result<String> {
    let patient = load_patient(&args).await?;
    let request = build_request(&args, &patient)?;
    let dictionary = load_dictionary(&args, &request.condition_codes).await?;
    let registry = CtGovClient::new()?;
    let config = match_config(&args);

    let session = Arc::new(MatchSession::new());
    let interrupt = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; cancelling match run");
                session.cancel();
            }
        })
    };
    let outcome = session
        .run(
            &registry,
            &dictionary,
            Arc::new(request.criteria),
            &request.condition_codes,
            &config,
        )
        .await;
    interrupt.abort();
    let outcome = outcome?;

    let report = MatchReport::from_outcome(&outcome, Some(args.limit));
    if json {
        return Ok(crate::render::json::to_pretty(&report)?);
    }
    Ok(crate::render::markdown::matches_markdown(
        &report,
        patient.patient_id.as_deref(),
        args.details,
    )?)
}

/// Executes a parsed command and returns its rendered output.
///
/// # Errors
///
/// Returns an error when arguments are invalid, an upstream collaborator
/// fails outside per-keyword retrieval, or the run is cancelled.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let Cli {
        command,
        json,
        no_cache,
    } = cli;

    crate::sources::with_no_cache(no_cache, async move {
        match command {
            Commands::Match(args) => run_match_command(args, json).await,
            Commands::Health { apis_only } => {
                let report = health::check(apis_only).await?;
                if json {
                    Ok(crate::render::json::to_pretty(&report)?)
                } else {
                    Ok(report.to_markdown())
                }
            }
        }
    })
    .await
}
