//! Behavior selection state
//!
//! Which category, location and behavior the user picked for the next
//! submission. Pure state; nothing here is persisted.

use crate::models::{Behavior, Category, Location};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviorSelection {
    pub category: Category,
    pub location: Option<Location>,
    pub behavior: Option<Behavior>,
}

impl BehaviorSelection {
    pub fn new(location: Option<Location>) -> Self {
        Self {
            location,
            ..Default::default()
        }
    }

    /// Behaviors matching the selected location and category
    pub fn visible_behaviors<'a>(&self, all: &'a [Behavior]) -> Vec<&'a Behavior> {
        all.iter()
            .filter(|b| b.category == self.category)
            .filter(|b| match &self.location {
                Some(location) => b.location.name == location.name,
                None => false,
            })
            .collect()
    }

    pub fn select_category(&mut self, category: Category, all: &[Behavior]) {
        self.category = category;
        self.reselect(all);
    }

    pub fn cycle_category(&mut self, all: &[Behavior]) -> Category {
        self.select_category(self.category.next(), all);
        self.category
    }

    pub fn select_location(&mut self, location: Location, all: &[Behavior]) {
        self.location = Some(location);
        self.reselect(all);
    }

    /// Pick a behavior; ignored unless it is currently visible
    pub fn select_behavior(&mut self, behavior: &Behavior, all: &[Behavior]) -> bool {
        let visible = self.visible_behaviors(all).into_iter().any(|b| b.id == behavior.id);
        if visible {
            self.behavior = Some(behavior.clone());
        }
        visible
    }

    fn reselect(&mut self, all: &[Behavior]) {
        self.behavior = self.visible_behaviors(all).first().map(|b| (*b).clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn behavior(id: &str, location: &str, category: Category) -> Behavior {
        Behavior {
            id: id.into(),
            title: format!("Behavior {}", id),
            location: Location::named(location),
            category,
        }
    }

    fn catalog() -> Vec<Behavior> {
        vec![
            behavior("1", "Gym", Category::Safe),
            behavior("2", "Gym", Category::Responsible),
            behavior("3", "Hall", Category::Safe),
            behavior("4", "Gym", Category::Safe),
        ]
    }

    #[test]
    fn test_location_change_reselects_first_visible() {
        let all = catalog();
        let mut selection = BehaviorSelection::default();
        assert!(selection.visible_behaviors(&all).is_empty());

        selection.select_location(Location::named("Gym"), &all);
        let ids: Vec<&str> = selection
            .visible_behaviors(&all)
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(selection.behavior.as_ref().map(|b| b.id.as_str()), Some("1"));
    }

    #[test]
    fn test_cycle_category() {
        let all = catalog();
        let mut selection = BehaviorSelection::new(Some(Location::named("Gym")));

        assert_eq!(selection.cycle_category(&all), Category::Responsible);
        assert_eq!(selection.behavior.as_ref().map(|b| b.id.as_str()), Some("2"));

        assert_eq!(selection.cycle_category(&all), Category::Considerate);
        assert!(selection.behavior.is_none());
    }

    #[test]
    fn test_hidden_behavior_not_selectable() {
        let all = catalog();
        let mut selection = BehaviorSelection::new(Some(Location::named("Hall")));
        assert!(!selection.select_behavior(&all[0], &all));
        assert!(selection.select_behavior(&all[2], &all));
    }
}
