//! Onboarding progress and the selected project.

use workbench_protocol::ProjectId;

use crate::events::WorkbenchEvent;
use crate::status::OnboardingStatus;

/// Onboarding only moves on its four matching events and never leaves `Done`.
pub fn next_onboarding(current: OnboardingStatus, event: &WorkbenchEvent) -> OnboardingStatus {
    use OnboardingStatus::{BrandNew, CreatingFirstProject, Done, IntroducingSidebar};

    match (current, event) {
        (Done, _) => Done,
        (BrandNew, WorkbenchEvent::CreateNewProjectStart) => CreatingFirstProject,
        (CreatingFirstProject, WorkbenchEvent::CreateNewProjectCancel) => BrandNew,
        (CreatingFirstProject, WorkbenchEvent::AddProject(_)) => IntroducingSidebar,
        (IntroducingSidebar, WorkbenchEvent::DismissSidebarIntro) => Done,
        (status, _) => status,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selected: Option<ProjectId>,
    onboarding: OnboardingStatus,
}

impl SelectionState {
    pub fn selected(&self) -> Option<&ProjectId> {
        self.selected.as_ref()
    }

    pub fn onboarding(&self) -> OnboardingStatus {
        self.onboarding
    }

    pub(crate) fn select(&mut self, project_id: ProjectId) {
        self.selected = Some(project_id);
    }

    /// New projects are selected automatically once onboarding is complete.
    /// During onboarding the user has to pick the first project by hand.
    pub(crate) fn project_arrived(&mut self, project_id: &ProjectId, onboarding_completed: bool) {
        self.selected = onboarding_completed.then(|| project_id.clone());
    }

    pub(crate) fn project_removed(&mut self, project_id: &ProjectId) {
        if self.selected.as_ref() == Some(project_id) {
            self.selected = None;
        }
    }

    pub(crate) fn retain_if(&mut self, exists: impl FnOnce(&ProjectId) -> bool) {
        if let Some(selected) = &self.selected {
            if !exists(selected) {
                self.selected = None;
            }
        }
    }

    pub(crate) fn advance_onboarding(&mut self, event: &WorkbenchEvent) {
        self.onboarding = next_onboarding(self.onboarding, event);
    }

    /// Fresh selection that keeps onboarding progress.
    pub(crate) fn after_reset(onboarding: OnboardingStatus) -> Self {
        Self {
            selected: None,
            onboarding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::OnboardingStatus::*;

    #[test]
    fn onboarding_walks_the_happy_path() {
        let mut status = BrandNew;
        status = next_onboarding(status, &WorkbenchEvent::CreateNewProjectStart);
        assert_eq!(status, CreatingFirstProject);
        status = next_onboarding(status, &WorkbenchEvent::DismissSidebarIntro);
        assert_eq!(status, CreatingFirstProject);
        status = next_onboarding(status, &WorkbenchEvent::CreateNewProjectCancel);
        assert_eq!(status, BrandNew);
        status = next_onboarding(status, &WorkbenchEvent::CreateNewProjectStart);
        assert_eq!(status, CreatingFirstProject);
    }

    #[test]
    fn done_is_absorbing() {
        for event in [
            WorkbenchEvent::CreateNewProjectStart,
            WorkbenchEvent::CreateNewProjectCancel,
            WorkbenchEvent::DismissSidebarIntro,
            WorkbenchEvent::ResetAllState,
        ] {
            assert_eq!(next_onboarding(Done, &event), Done);
        }
    }

    #[test]
    fn arrival_selects_only_after_onboarding() {
        let project = ProjectId::new("p1");
        let mut selection = SelectionState::after_reset(IntroducingSidebar);
        selection.project_arrived(&project, false);
        assert_eq!(selection.selected(), None);

        selection.project_arrived(&project, true);
        assert_eq!(selection.selected(), Some(&project));

        selection.project_removed(&ProjectId::new("other"));
        assert_eq!(selection.selected(), Some(&project));
        selection.project_removed(&project);
        assert_eq!(selection.selected(), None);
    }
}
