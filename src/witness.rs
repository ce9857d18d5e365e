//! Witness-triggered script activation/deactivation — §4.7.
//!
//! A [`WitnessAction`] is a deferred mutation to the active script list: it
//! waits until every class in one of its trigger groups has been observed
//! loading, then adds or removes its script exactly once.

use crate::rewrite::PatchScript;

/// What a triggered [`WitnessAction`] does to the active script list.
pub enum WitnessEffect {
    AddScriptIfWitness,
    RemoveScriptIfWitness,
}

/// A deferred script activation/deactivation gated on observing a set of
/// class loads — §3/§4.7.
pub struct WitnessAction {
    /// Each inner set is one *trigger group*: the action only fires once
    /// every class name in at least one group has been witnessed. Groups
    /// are independent; satisfying any one group is enough.
    trigger_groups: Vec<Vec<String>>,
    effect: WitnessEffect,
    script: PatchScript,
    triggered: bool,
}

impl WitnessAction {
    pub fn new(
        trigger_groups: Vec<Vec<String>>,
        effect: WitnessEffect,
        script: PatchScript,
    ) -> Self {
        Self { trigger_groups, effect, script, triggered: false }
    }

    /// Removes `class_name` from every trigger group that contains it. When
    /// a group becomes empty the action fires (if it hasn't already):
    /// marks itself `triggered` and returns the effect to apply.
    ///
    /// A triggered action never fires twice, matching §3's "one-shot flag".
    pub(crate) fn observe(&mut self, class_name: &str) -> Option<&WitnessEffect> {
        if self.triggered {
            return None;
        }
        for group in &mut self.trigger_groups {
            group.retain(|member| member != class_name);
        }
        let satisfied = self.trigger_groups.iter().any(|group| group.is_empty());
        if satisfied {
            self.triggered = true;
            Some(&self.effect)
        } else {
            None
        }
    }

    pub(crate) fn script(&self) -> &PatchScript {
        &self.script
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered
    }
}
