mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use tokenlink_kernel::bulk::DetachRequest;
use tokenlink_kernel::fix::{ActionStatus, ActionType};
use tokenlink_kernel::{apply_bulk_fix, bulk_detach_styles, Context, FixRequest, Progress};

use common::{capture_logs, harness};

fn three_fixes() -> Vec<FixRequest> {
    vec![
        FixRequest::new("frame-1", "fills", "system/background/surface"),
        FixRequest::new("badge-1", "fills", "brand/unknown"),
        FixRequest::new("frame-1", "cornerRadius", "system/radius/md"),
    ]
}

#[test]
fn failed_items_do_not_stop_the_batch() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let mut events: Vec<(usize, usize, ActionStatus)> = Vec::new();
    let summary = apply_bulk_fix(
        &mut h.ctx,
        &three_fixes(),
        &mut |_ctx: &mut Context, progress: &Progress| {
            let action = progress.action.as_ref().expect("action attached");
            events.push((progress.current, progress.total, action.status));
        },
    );

    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.cancelled);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].index, 1);
    assert_eq!(summary.errors[0].node_id, "badge-1");
    assert!(summary.errors[0].message.contains("no variable matches token brand/unknown"));

    let nodes: Vec<&str> = summary.actions.iter().map(|action| action.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["frame-1", "badge-1", "frame-1"]);
    assert!(summary.actions.iter().all(|action| action.action == ActionType::Rebind));
    assert_eq!(summary.results.len(), 3);

    assert_eq!(
        events,
        vec![
            (1, 3, ActionStatus::Success),
            (2, 3, ActionStatus::Failed),
            (3, 3, ActionStatus::Success),
        ]
    );
    assert_eq!(h.yields.load(Ordering::SeqCst), 3);
    assert_eq!(h.ctx.audit_log().len(), 3);
    Ok(())
}

#[test]
fn failed_items_are_logged_as_warnings() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let logs = capture_logs(&h.registry);
    apply_bulk_fix(&mut h.ctx, &three_fixes(), &mut |_ctx: &mut Context, _progress: &Progress| {});

    let logs = logs.lock().unwrap();
    let warnings: Vec<_> = logs
        .iter()
        .filter(|entry| entry.get("message").and_then(|m| m.as_str()) == Some("bulk item failed"))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["level"], "warn");
    assert_eq!(warnings[0]["data"]["index"], 1);
    assert_eq!(warnings[0]["data"]["nodeId"], "badge-1");
    assert_eq!(warnings[0]["tags"]["component"], "engine");
    Ok(())
}

#[test]
fn cancelling_from_progress_stops_after_the_current_item() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let summary = apply_bulk_fix(
        &mut h.ctx,
        &three_fixes(),
        &mut |ctx: &mut Context, _progress: &Progress| ctx.cancel(),
    );

    assert!(summary.cancelled);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.actions.len(), 1);
    Ok(())
}

#[test]
fn cancelling_on_the_last_item_still_completes() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let summary = apply_bulk_fix(
        &mut h.ctx,
        &three_fixes(),
        &mut |ctx: &mut Context, progress: &Progress| {
            if progress.current == progress.total {
                ctx.cancel();
            }
        },
    );

    assert!(!summary.cancelled);
    assert_eq!(summary.actions.len(), 3);
    Ok(())
}

#[test]
fn pre_cancelled_token_processes_nothing() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let token = Arc::new(AtomicBool::new(true));
    h.ctx.set_cancellation_token(token);
    let summary = apply_bulk_fix(&mut h.ctx, &three_fixes(), &mut |_ctx: &mut Context, _progress: &Progress| {});

    assert!(summary.cancelled);
    assert!(summary.actions.is_empty());
    assert_eq!(h.yields.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn bulk_detach_mixes_rebound_skipped_and_failed_items() -> Result<()> {
    let mut h = harness(common::design_document())?;
    let mut plain = DetachRequest::new("chip-1", "fills");
    plain.rebind = false;
    let items = vec![
        DetachRequest::new("badge-1", "fills"),
        DetachRequest::new("frame-1", "fills"),
        DetachRequest::new("text-1", "text"),
        plain,
    ];
    let mut seen = 0;
    let summary = bulk_detach_styles(&mut h.ctx, &items, &mut |_ctx: &mut Context, _progress: &Progress| {
        seen += 1
    });

    assert_eq!(summary.successful, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].index, 1);
    assert!(summary.results[0]
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("rebind skipped"));
    assert!(summary.results[3].variable_id.is_none());
    assert!(summary.actions.iter().all(|action| action.action == ActionType::Detach));
    assert_eq!(seen, 4);
    Ok(())
}
