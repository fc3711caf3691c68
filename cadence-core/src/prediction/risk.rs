//! Class-level views over open student assignments
//!
//! A student assignment is at risk when it is overdue, unstarted for more
//! than a week, or started and stalled for more than three days. At-risk
//! entries are scored additively and ranked highest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::CompletionStats;
use crate::store::{AssignmentContext, AssignmentStatus};
use crate::velocity::VelocityResult;

pub const OVERDUE_POINTS: u32 = 10;
pub const LONG_AGED_POINTS: u32 = 8;
pub const AGED_POINTS: u32 = 5;
pub const NOT_STARTED_POINTS: u32 = 6;
pub const STALLED_POINTS: u32 = 4;

const LONG_AGED_DAYS: f64 = 14.0;
const AGED_DAYS: f64 = 7.0;
const STALLED_DAYS: f64 = 3.0;

/// Page size used when a caller does not pick one
pub const DEFAULT_AT_RISK_LIMIT: usize = 20;

/// One student assignment that needs attention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtRiskStudent {
    pub student_id: String,
    pub assignment_id: String,
    pub class_id: String,
    pub status: AssignmentStatus,
    pub days_since_assigned: i64,
    /// Whole days past the due date, if overdue
    pub days_overdue: Option<i64>,
    pub risk_score: u32,
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 86_400_000.0
}

/// Score one student assignment, `None` when it is not at risk
pub fn assess(assignment: &AssignmentContext, now: DateTime<Utc>) -> Option<AtRiskStudent> {
    let status = assignment.status();
    let age_days = days_between(assignment.assigned_at, now);
    let overdue = assignment.is_overdue(now);
    let stalled = status == AssignmentStatus::InProgress
        && assignment
            .started_at
            .is_some_and(|started| days_between(started, now) > STALLED_DAYS);
    let neglected = status == AssignmentStatus::NotStarted && age_days > AGED_DAYS;

    if !(overdue || stalled || neglected) {
        return None;
    }

    let mut risk_score = 0;
    if overdue {
        risk_score += OVERDUE_POINTS;
    }
    if age_days > LONG_AGED_DAYS {
        risk_score += LONG_AGED_POINTS;
    } else if age_days > AGED_DAYS {
        risk_score += AGED_POINTS;
    }
    if status == AssignmentStatus::NotStarted {
        risk_score += NOT_STARTED_POINTS;
    } else if stalled {
        risk_score += STALLED_POINTS;
    }

    let days_overdue = assignment
        .due_at
        .filter(|_| overdue)
        .map(|due| days_between(due, now).round() as i64);

    Some(AtRiskStudent {
        student_id: assignment.student_id.clone(),
        assignment_id: assignment.assignment_id.clone(),
        class_id: assignment.class_id.clone(),
        status,
        days_since_assigned: age_days.round() as i64,
        days_overdue,
        risk_score,
    })
}

/// At-risk entries, highest score first, then longest outstanding
pub fn rank_at_risk(
    assignments: &[AssignmentContext],
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<AtRiskStudent> {
    let mut scored: Vec<(DateTime<Utc>, AtRiskStudent)> = assignments
        .iter()
        .filter_map(|a| assess(a, now).map(|risk| (a.assigned_at, risk)))
        .collect();
    scored.sort_by(|(a_at, a), (b_at, b)| {
        b.risk_score
            .cmp(&a.risk_score)
            .then_with(|| a_at.cmp(b_at))
            .then_with(|| a.student_id.cmp(&b.student_id))
            .then_with(|| a.assignment_id.cmp(&b.assignment_id))
    });
    scored.into_iter().take(limit).map(|(_, risk)| risk).collect()
}

/// Assignment funnel for one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassAssignmentMetrics {
    pub class_id: String,
    /// Distinct assignments handed out in the class
    pub total_assignments: usize,
    /// Student-assignment pairs
    pub student_assignments: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub overdue: usize,
    /// Completed share of student assignments
    pub completion_rate: f64,
    pub at_risk: usize,
    /// Completion times of the class's finished assignments
    pub completion: CompletionStats,
    pub class_velocity: f64,
    pub low_signal: bool,
}

/// Summarize a class's assignments
pub fn summarize_class(
    class_id: &str,
    assignments: &[AssignmentContext],
    completion: CompletionStats,
    velocity: &VelocityResult,
    now: DateTime<Utc>,
) -> ClassAssignmentMetrics {
    let mut distinct: Vec<&str> = assignments
        .iter()
        .map(|a| a.assignment_id.as_str())
        .collect();
    distinct.sort_unstable();
    distinct.dedup();

    let count = |status: AssignmentStatus| {
        assignments
            .iter()
            .filter(|a| a.status() == status)
            .count()
    };
    let completed = count(AssignmentStatus::Completed);
    let student_assignments = assignments.len();
    let low_signal = velocity.low_signal || completion.sample_size == 0;

    ClassAssignmentMetrics {
        class_id: class_id.to_string(),
        total_assignments: distinct.len(),
        student_assignments,
        completed,
        in_progress: count(AssignmentStatus::InProgress),
        not_started: count(AssignmentStatus::NotStarted),
        overdue: assignments.iter().filter(|a| a.is_overdue(now)).count(),
        completion_rate: if student_assignments == 0 {
            0.0
        } else {
            completed as f64 / student_assignments as f64
        },
        at_risk: assignments
            .iter()
            .filter(|a| assess(a, now).is_some())
            .count(),
        completion,
        class_velocity: velocity.rate_per_day,
        low_signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velocity::{BandMethod, ConfidenceBand, ConfidenceGrade};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - ChronoDuration::days(days)
    }

    fn open(student: &str, assigned_days_ago: i64) -> AssignmentContext {
        AssignmentContext {
            assignment_id: "a1".to_string(),
            class_id: "c1".to_string(),
            student_id: student.to_string(),
            complexity_units: 2.0,
            complexity_bucket: "medium".to_string(),
            assigned_at: days_ago(assigned_days_ago),
            started_at: None,
            due_at: None,
            completed_at: None,
        }
    }

    // ==================== Scoring Tests ====================

    #[test]
    fn fresh_assignment_is_not_at_risk() {
        assert!(assess(&open("s1", 2), now()).is_none());
    }

    #[test]
    fn unstarted_week_old_assignment_scores_aged_and_not_started() {
        let risk = assess(&open("s1", 8), now()).unwrap();
        assert_eq!(risk.risk_score, AGED_POINTS + NOT_STARTED_POINTS);
        assert_eq!(risk.status, AssignmentStatus::NotStarted);
        assert_eq!(risk.days_since_assigned, 8);
        assert_eq!(risk.days_overdue, None);
    }

    #[test]
    fn overdue_long_aged_unstarted_scores_everything() {
        let mut assignment = open("s1", 20);
        assignment.due_at = Some(days_ago(5));

        let risk = assess(&assignment, now()).unwrap();
        assert_eq!(
            risk.risk_score,
            OVERDUE_POINTS + LONG_AGED_POINTS + NOT_STARTED_POINTS
        );
        assert_eq!(risk.days_overdue, Some(5));
    }

    #[test]
    fn stalled_work_counts_but_recent_work_does_not() {
        let mut stalled = open("s1", 5);
        stalled.started_at = Some(days_ago(4));
        assert_eq!(assess(&stalled, now()).unwrap().risk_score, STALLED_POINTS);

        let mut active = open("s2", 5);
        active.started_at = Some(days_ago(1));
        assert!(assess(&active, now()).is_none());
    }

    #[test]
    fn completed_work_is_never_at_risk() {
        let mut done = open("s1", 30);
        done.due_at = Some(days_ago(10));
        done.started_at = Some(days_ago(29));
        done.completed_at = Some(days_ago(12));
        assert!(assess(&done, now()).is_none());
    }

    // ==================== Ranking Tests ====================

    #[test]
    fn ranking_orders_by_score_then_age_and_honors_limit() {
        let mut overdue = open("s1", 9);
        overdue.due_at = Some(days_ago(1));
        let older = open("s2", 12);
        let newer = open("s3", 10);
        let fine = open("s4", 1);
        let assignments = vec![newer, fine, older, overdue];

        let ranked = rank_at_risk(&assignments, now(), 10);
        let order: Vec<&str> = ranked.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2", "s3"]);

        assert_eq!(rank_at_risk(&assignments, now(), 1).len(), 1);
        assert!(rank_at_risk(&assignments, now(), 0).is_empty());
    }

    // ==================== Class Summary Tests ====================

    #[test]
    fn class_summary_counts_the_funnel() {
        let mut done = open("s1", 10);
        done.started_at = Some(days_ago(9));
        done.completed_at = Some(days_ago(8));
        let mut late = open("s2", 10);
        late.due_at = Some(days_ago(2));
        let mut working = open("s3", 2);
        working.assignment_id = "a2".to_string();
        working.started_at = Some(days_ago(1));
        let assignments = vec![done, late, working];

        let velocity = VelocityResult {
            rate_per_day: 12.0,
            sample_count: 30,
            window_start: days_ago(14),
            window_end: now(),
            low_signal: false,
            ema_per_day: 12.0,
            band: ConfidenceBand {
                lower: 10.0,
                upper: 14.0,
                method: BandMethod::NormalApprox,
                confidence_level: 0.95,
            },
            grade: ConfidenceGrade::High,
        };
        let summary = summarize_class(
            "c1",
            &assignments,
            CompletionStats::empty(),
            &velocity,
            now(),
        );

        assert_eq!(summary.total_assignments, 2);
        assert_eq!(summary.student_assignments, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.not_started, 1);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.at_risk, 1);
        assert!((summary.completion_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.class_velocity, 12.0);
        assert!(summary.low_signal);
    }
}
