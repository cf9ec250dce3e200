//! Implementation of the `devloop insights` command.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use owo_colors::{OwoColorize, Stream};

use devloop_lib::insights::{
  BuildInsights, FileStore, InsightsStore, RecommendationPriority, ResourceStats, StreakType,
};
use devloop_lib::manifest::ManifestName;

use crate::output::{
  format_bytes, format_ms, print_heading, print_info, print_json, print_stat, print_success, symbols,
};

pub struct InsightsArgs {
  pub since: Duration,
  pub resource: Option<String>,
  pub limit: usize,
  pub json: bool,
  pub clear_older_than: Option<Duration>,
}

pub fn cmd_insights(args: InsightsArgs) -> Result<()> {
  let store = FileStore::open_default().context("Failed to open build insights")?;

  if let Some(age) = args.clear_older_than {
    let cutoff = Utc::now() - chrono::Duration::from_std(age).context("Duration out of range")?;
    let removed = store.clear_older_than(cutoff)?;
    store.close().context("Failed to save build insights")?;
    print_success(&format!(
      "Removed {} build(s) older than {}",
      removed,
      humantime::format_duration(age)
    ));
    return Ok(());
  }

  let since = Utc::now() - chrono::Duration::from_std(args.since).context("Duration out of range")?;

  if let Some(resource) = args.resource {
    let name = ManifestName::new(resource);
    let stats = store.resource_stats(&name)?;
    let mut history = store.build_history(&name, since)?;
    history.truncate(args.limit);

    if args.json {
      return print_json(&serde_json::json!({ "stats": stats, "builds": history }));
    }
    print_resource(&stats);
    print_heading(&format!("Builds in the last {}", humantime::format_duration(args.since)));
    for build in &history {
      let (symbol, status) = if build.success {
        (symbols::SUCCESS, "ok")
      } else {
        (symbols::ERROR, "failed")
      };
      println!(
        "  {} {}  {:>10}  {}",
        symbol,
        build.start_time.format("%Y-%m-%d %H:%M:%S"),
        format_ms(build.duration_ms),
        status
      );
    }
    return Ok(());
  }

  let insights = store.insights(since)?;
  if args.json {
    return print_json(&insights);
  }
  if insights.session.total_builds == 0 {
    print_info(&format!(
      "No builds recorded in the last {}",
      humantime::format_duration(args.since)
    ));
    return Ok(());
  }
  print_report(&insights);
  Ok(())
}

fn print_resource(stats: &ResourceStats) {
  print_heading(stats.manifest_name.as_str());
  print_stat("Builds", &stats.total_builds.to_string());
  print_stat("Success rate", &format!("{:.1}%", stats.success_rate));
  print_stat("Average", &format_ms(stats.average_duration_ms));
  print_stat("Min / Max", &format!("{} / {}", format_ms(stats.min_duration_ms), format_ms(stats.max_duration_ms)));
  print_stat(
    "p50 / p95 / p99",
    &format!(
      "{} / {} / {}",
      format_ms(stats.p50_duration_ms),
      format_ms(stats.p95_duration_ms),
      format_ms(stats.p99_duration_ms)
    ),
  );
  print_stat(
    "Live updates",
    &format!("{} of {}", stats.live_update_count, stats.total_builds),
  );
  print_stat("Cache hit rate", &format!("{:.0}%", stats.cache_hit_rate));
  print_stat("Warnings", &stats.total_warnings.to_string());
  print_stat("Files per build", &format!("{:.1}", stats.average_files_changed));
}

fn print_report(insights: &BuildInsights) {
  let s = &insights.session;
  print_heading("Session");
  print_stat("Builds", &s.total_builds.to_string());
  print_stat("Successful", &s.successful_builds.to_string());
  print_stat("Failed", &s.failed_builds.to_string());
  print_stat("Average", &format_ms(s.average_duration_ms));
  print_stat("Total", &format_ms(s.total_duration_ms));
  print_stat("Live updates", &s.live_update_count.to_string());
  print_stat("Full rebuilds", &s.full_rebuild_count.to_string());
  print_stat("Resources", &s.resource_count.to_string());
  if let Some(streak) = s.streak_type {
    let text = match streak {
      StreakType::Success => format!("{} successful", s.current_streak),
      StreakType::Failure => format!("{} failed", s.current_streak),
    };
    print_stat("Current streak", &text);
  }

  print_heading("Resources");
  for r in &insights.resources {
    let symbol = if r.success_rate >= 90.0 {
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string()
    } else if r.success_rate >= 70.0 {
      symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string()
    } else {
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string()
    };
    let cached = if r.cache_hit_rate > 0.0 {
      format!("  {:.0}% cached", r.cache_hit_rate)
    } else {
      String::new()
    };
    println!(
      "  {} {:<20} {:>3} builds  avg {:<10} {:.0}% success{}",
      symbol,
      r.manifest_name.as_str(),
      r.total_builds,
      format_ms(r.average_duration_ms),
      r.success_rate,
      cached
    );
  }

  if !insights.slowest_builds.is_empty() {
    print_heading("Slowest builds");
    for b in insights.slowest_builds.iter().take(5) {
      let size = if b.image_size > 0 {
        format!("  {}", format_bytes(b.image_size))
      } else {
        String::new()
      };
      println!(
        "  {} {:<20} {:<10} {}{}",
        symbols::INFO,
        b.manifest_name.as_str(),
        format_ms(b.duration_ms),
        b.start_time.format("%H:%M:%S"),
        size
      );
    }
  }

  if !insights.recommendations.is_empty() {
    print_heading("Recommendations");
    for rec in &insights.recommendations {
      let priority = match rec.priority {
        RecommendationPriority::High => "HIGH".if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
        RecommendationPriority::Medium => "MEDIUM".if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
        RecommendationPriority::Low => "LOW".if_supports_color(Stream::Stdout, |s| s.blue()).to_string(),
      };
      println!("  [{}] {}", priority, rec.title.if_supports_color(Stream::Stdout, |s| s.bold()));
      println!("      {}", rec.description);
      if let Some(savings) = rec.potential_savings_ms
        && savings > 0
      {
        println!("      Potential savings: {} per build", format_ms(savings));
      }
    }
  }

  println!();
  println!("Generated at: {}", insights.generated_at.to_rfc3339());
}
