use std::{process, sync::Arc};

use time::OffsetDateTime;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vellum::{
    application::{
        engine::{EngineOptions, ThemeEngine},
        error::AppError,
        transfer::{ImportOptions, ThemeConfigExport, export_filename},
    },
    config::{self, Command},
    domain::kind::{ContentKind, TemplateParams},
    infra::{error::InfraError, settings::JsonFileSettingsStore, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.render(), critical = error.is_critical(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.render(), critical = error.is_critical(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let store = JsonFileSettingsStore::open(&settings.settings_store.path).await?;
    let engine = ThemeEngine::build(EngineOptions::from(&settings), Arc::new(store)).await;

    match cli_args.command {
        Command::List => run_list(&engine).await,
        Command::Validate(args) => run_validate(&engine, &args.theme, args.json).await,
        Command::Hierarchy(args) => run_hierarchy(&engine, &args.theme).await,
        Command::Resolve(args) => run_resolve(&engine, args).await,
        Command::Activate(args) => run_activate(&engine, &args.theme).await,
        Command::Export(args) => run_export(&engine, args).await,
        Command::Import(args) => run_import(&engine, args).await,
    }
}

async fn run_list(engine: &ThemeEngine) -> Result<(), AppError> {
    let active = engine.active_theme();
    for theme in engine.list_themes().await? {
        let marker = if theme == active { "*" } else { " " };
        println!("{marker} {theme}");
    }
    Ok(())
}

async fn run_validate(engine: &ThemeEngine, theme: &str, json: bool) -> Result<(), AppError> {
    let report = engine.validate(theme).await;
    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| InfraError::serialization(err.to_string()))?;
        println!("{rendered}");
    } else {
        println!(
            "{theme}: {}",
            if report.valid { "valid" } else { "invalid" }
        );
        for err in &report.errors {
            println!("  error: {err}");
        }
        for warning in &report.warnings {
            println!("  warning: {warning}");
        }
    }
    if report.valid {
        Ok(())
    } else {
        Err(report.into_error().into())
    }
}

async fn run_hierarchy(engine: &ThemeEngine, theme: &str) -> Result<(), AppError> {
    let chain = engine.hierarchy(theme).await?;
    println!("{}", chain.join(" -> "));
    Ok(())
}

async fn run_resolve(engine: &ThemeEngine, args: config::ResolveArgs) -> Result<(), AppError> {
    let kind: ContentKind = args
        .kind
        .parse()
        .map_err(|err: vellum::domain::kind::UnknownContentKind| {
            AppError::validation(err.to_string())
        })?;
    let params = TemplateParams {
        slug: args.slug,
        id: args.id,
    };
    let theme = args.theme.unwrap_or_else(|| engine.active_theme());
    match engine
        .resolver()
        .resolve_template_in(&theme, kind, &params)
        .await?
    {
        Some(resolved) => println!(
            "{} ({}: {})",
            resolved.name,
            resolved.theme,
            resolved.path.display()
        ),
        None => println!("no template renders `{kind}` in `{theme}`"),
    }
    Ok(())
}

async fn run_activate(engine: &ThemeEngine, theme: &str) -> Result<(), AppError> {
    let outcome = engine.activate(theme).await?;
    println!("activated {} (previous: {})", outcome.theme, outcome.previous);
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    if !outcome.initialized.is_empty() {
        println!("  initialized: {}", outcome.initialized.join(", "));
    }

    if let Some(handle) = outcome.warmup {
        match handle.await {
            Ok(report) => info!(
                theme = %report.theme,
                loaded = report.loaded.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "warmup finished"
            ),
            Err(err) => warn!(error = %err, "warmup task did not complete"),
        }
    }
    Ok(())
}

async fn run_export(engine: &ThemeEngine, args: config::ExportArgs) -> Result<(), AppError> {
    let export = engine.transfer().export_theme_config(&args.theme).await?;
    let file = if args.file.is_dir() {
        args.file
            .join(export_filename(&args.theme, OffsetDateTime::now_utc().date()))
    } else {
        args.file
    };
    tokio::fs::write(&file, export.to_json_pretty()?)
        .await
        .map_err(InfraError::from)?;
    println!(
        "exported {} settings of {} to {}",
        export.settings.len(),
        args.theme,
        file.display()
    );
    Ok(())
}

async fn run_import(engine: &ThemeEngine, args: config::ImportArgs) -> Result<(), AppError> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(InfraError::from)?;
    let export = ThemeConfigExport::parse(&raw)?;

    let check = engine.transfer().validate_export(&export).await;
    for warning in &check.warnings {
        println!("  warning: {warning}");
    }

    let options = ImportOptions {
        overwrite: args.overwrite,
        skip_settings: args.skip,
        validate_theme: !args.no_validate,
    };
    let result = engine
        .transfer()
        .import_theme_config(&export, &options)
        .await;
    println!(
        "imported {}, skipped {}",
        result.imported.len(),
        result.skipped.len()
    );
    for err in &result.errors {
        println!("  error: {err}");
    }
    if result.success {
        Ok(())
    } else {
        Err(AppError::validation(result.errors.join("; ")))
    }
}
