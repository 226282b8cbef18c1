use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use submariner_crds::v1::globalegressip::CONDITION_ALLOCATED;

pub(crate) fn allocated(status: bool, reason: &str, message: String) -> Condition {
    Condition {
        last_transition_time: Time(Utc::now()),
        message,
        observed_generation: None,
        reason: reason.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        type_: CONDITION_ALLOCATED.to_string(),
    }
}

/// Replaces the last condition of the same type only when its
/// status/reason/message differ, so repeated reconciles never grow the
/// list. The transition time is carried over unless the status flipped.
pub(crate) fn try_append(conditions: &mut Vec<Condition>, new: Condition) {
    let Some(last) = conditions.iter_mut().rev().find(|c| c.type_ == new.type_) else {
        conditions.push(new);
        return;
    };

    if last.status == new.status && last.reason == new.reason && last.message == new.message {
        return;
    }

    let last_transition_time = if last.status == new.status {
        last.last_transition_time.clone()
    } else {
        new.last_transition_time.clone()
    };

    *last = Condition {
        last_transition_time,
        ..new
    };
}
