//! CLI command implementations.
//!
//! Each function backs one `Commands` variant in `main.rs`. Interactive
//! commands surface not-found and generation failures as real errors;
//! `post` stays silent about summarization no matter how it goes.

use anyhow::Result;

use braid::config::Config;
use braid::context::{ContextBuilder, ContextOptions};
use braid::store::models::MessageRole;
use braid::summarize::DEFAULT_TRIGGER_TIMEOUT;

pub async fn cmd_context(
    config: &Config,
    branch_id: &str,
    messages: usize,
    no_artifacts: bool,
    no_parents: bool,
    no_summary: bool,
) -> Result<()> {
    let db = config.open_db()?;
    let builder = ContextBuilder::new(db);
    let options = ContextOptions {
        message_limit: messages,
        include_artifacts: !no_artifacts,
        include_parents: !no_parents,
        include_summary: !no_summary,
        ..Default::default()
    };
    let pack = builder.build_context(branch_id, &options).await?;
    println!("{}", pack.to_prompt_string());
    eprintln!("\n[context] ~{} tokens, generated {}", pack.estimated_tokens, pack.generated_at);
    Ok(())
}

pub async fn cmd_needs(config: &Config, branch_id: &str) -> Result<()> {
    let db = config.open_db()?;
    let service = config.summarization_service(db);
    let needs = service.branch_needs_summary(branch_id).await?;
    println!("{}", if needs { "yes" } else { "no" });
    Ok(())
}

pub async fn cmd_summarize(config: &Config, branch_id: &str) -> Result<()> {
    let db = config.open_db()?;
    let service = config.summarization_service(db);
    match service.summarize_branch(branch_id).await? {
        Some(summary) => println!("{}", summary.to_display_string()),
        None => println!("No summary produced (too few messages, no provider, or lost a concurrent update)."),
    }
    Ok(())
}

pub async fn cmd_summarize_project(config: &Config, project_id: &str) -> Result<()> {
    let db = config.open_db()?;
    let service = config.summarization_service(db);
    match service.summarize_project(project_id).await? {
        Some(summary) => println!("{}", summary.to_display_string()),
        None => println!("No summary produced (no provider configured)."),
    }
    Ok(())
}

pub async fn cmd_sweep(config: &Config) -> Result<()> {
    let db = config.open_db()?;
    let service = config.summarization_service(db);
    let outcome = service.update_pending_summaries().await?;
    println!(
        "Updated {} branch(es), {} failed.",
        outcome.updated.len(),
        outcome.failed.len()
    );
    for id in &outcome.updated {
        println!("  updated: {}", id);
    }
    for id in &outcome.failed {
        println!("  failed:  {}", id);
    }
    Ok(())
}

pub async fn cmd_post(
    config: &Config,
    branch_id: &str,
    role: MessageRole,
    content: &str,
    user_id: Option<&str>,
) -> Result<()> {
    let db = config.open_db()?;

    let bid = branch_id.to_string();
    let content_owned = content.to_string();
    let uid = user_id.map(str::to_string);
    let message = db
        .call(move |db| db.append_message(&bid, role, &content_owned, None, uid.as_deref()))
        .await?;
    println!("{}", message.id);

    // Fire-and-forget by contract; the CLI merely keeps the process alive
    // until the background task settles.
    let service = config.summarization_service(db);
    let handle = service.trigger_summarization_if_needed(branch_id, DEFAULT_TRIGGER_TIMEOUT);
    let _ = handle.await;
    Ok(())
}
