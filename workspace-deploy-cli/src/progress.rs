use workspace_deploy::{Outcome, PublishResult};

pub fn make_progress_bar(len: usize) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::with_draw_target(
        Some(len as u64),
        indicatif::ProgressDrawTarget::stderr(),
    );
    if let Ok(style) = indicatif::ProgressStyle::with_template(
        "{spinner:.blue} [{pos}/{len}] {bar:30.cyan/blue} {wide_msg}",
    ) {
        pb.set_style(style.tick_strings(&[
            "▹▹▹▹▹",
            "▸▹▹▹▹",
            "▹▸▹▹▹",
            "▹▹▸▹▹",
            "▹▹▹▸▹",
            "▹▹▹▹▸",
            "▪▪▪▪▪",
        ]));
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

/// Advance `pb` for one result. Failures are printed above the bar so they stay visible.
pub fn record_result(pb: &indicatif::ProgressBar, result: &PublishResult) {
    match &result.outcome {
        Outcome::Failure(_) => pb.suspend(|| eprintln!("❌ {result}")),
        Outcome::Skipped(_) => pb.suspend(|| eprintln!("⏭️  {result}")),
        Outcome::Success(_) => {}
    }
    pb.set_message(result.to_string());
    pb.inc(1);
}

/// A one-line summary of a finished run.
pub fn summary(report: &workspace_deploy::PublishReport) -> String {
    let published = report.successes().count();
    let failed = report.failures().count();
    let skipped = report.skipped().count();
    if failed == 0 {
        format!("🎉 Successfully published {published} artifact(s), {skipped} skipped")
    } else {
        format!("⚠️  Published {published} artifact(s), {failed} failed, {skipped} skipped")
    }
}
