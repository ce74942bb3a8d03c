//! Persons and their daily plans.

use amod_env::{Coord, LinkId, Mode, PersonId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while validating a population.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PopulationError {
    #[error("Malformed plan for person {person}: {reason}")]
    MalformedPlan { person: PersonId, reason: String },
}

/// An activity performed at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Purpose tag (e.g. "home", "work", "pt interaction")
    pub purpose: String,
    pub coord: Coord,

    /// Link the activity is attached to. May lie outside the road graph.
    pub link: LinkId,

    /// Time in seconds at which the activity ends, if scheduled
    pub end_time: Option<f64>,
}

impl Activity {
    pub fn new(purpose: &str, coord: Coord, link: impl Into<LinkId>) -> Self {
        Self {
            purpose: purpose.to_string(),
            coord,
            link: link.into(),
            end_time: None,
        }
    }

    /// Sets the end time.
    pub fn with_end_time(mut self, end_time: f64) -> Self {
        self.end_time = Some(end_time);
        self
    }
}

/// A trip between two activities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub mode: Mode,
}

impl Leg {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanElement {
    Activity(Activity),
    Leg(Leg),
}

impl PlanElement {
    pub fn as_activity(&self) -> Option<&Activity> {
        match self {
            PlanElement::Activity(activity) => Some(activity),
            PlanElement::Leg(_) => None,
        }
    }

    pub fn as_leg(&self) -> Option<&Leg> {
        match self {
            PlanElement::Leg(leg) => Some(leg),
            PlanElement::Activity(_) => None,
        }
    }
}

/// Ordered activities and legs, alternating, starting and ending with an activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub elements: Vec<PlanElement>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_activity(&mut self, activity: Activity) {
        self.elements.push(PlanElement::Activity(activity));
    }

    pub fn push_leg(&mut self, leg: Leg) {
        self.elements.push(PlanElement::Leg(leg));
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Legs with the activities before and after them.
    pub fn trips(&self) -> impl Iterator<Item = (&Activity, &Leg, &Activity)> {
        self.elements.windows(3).filter_map(|w| {
            Some((w[0].as_activity()?, w[1].as_leg()?, w[2].as_activity()?))
        })
    }

    /// Checks the activity/leg alternation.
    pub fn validate(&self, person: &PersonId) -> Result<(), PopulationError> {
        let malformed = |reason: String| PopulationError::MalformedPlan {
            person: person.clone(),
            reason,
        };

        if self.elements.is_empty() {
            return Err(malformed("plan is empty".to_string()));
        }
        for (index, element) in self.elements.iter().enumerate() {
            let expect_activity = index % 2 == 0;
            match (expect_activity, element) {
                (true, PlanElement::Activity(_)) | (false, PlanElement::Leg(_)) => {}
                (true, PlanElement::Leg(_)) => {
                    return Err(malformed(format!("expected activity at element {}", index)))
                }
                (false, PlanElement::Activity(_)) => {
                    return Err(malformed(format!("expected leg at element {}", index)))
                }
            }
        }
        if self.elements.len() % 2 == 0 {
            return Err(malformed("plan ends with a leg".to_string()));
        }
        Ok(())
    }
}

/// A simulated traveller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,

    /// Candidate plans; the first one is executed
    pub plans: Vec<Plan>,
}

impl Person {
    pub fn new(id: impl Into<PersonId>, plan: Plan) -> Self {
        Self {
            id: id.into(),
            plans: vec![plan],
        }
    }

    /// The plan the engine executes.
    pub fn selected_plan(&self) -> Option<&Plan> {
        self.plans.first()
    }
}

/// All persons of a scenario, keyed and iterated by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    persons: BTreeMap<PersonId, Person>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a person, replacing any person with the same id.
    pub fn add_person(&mut self, person: Person) {
        self.persons.insert(person.id.clone(), person);
    }

    pub fn person(&self, id: &PersonId) -> Option<&Person> {
        self.persons.get(id)
    }

    pub fn persons(&self) -> impl Iterator<Item = &Person> {
        self.persons.values()
    }

    pub fn persons_mut(&mut self) -> impl Iterator<Item = &mut Person> {
        self.persons.values_mut()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    /// Validates every plan of every person.
    pub fn validate(&self) -> Result<(), PopulationError> {
        for person in self.persons.values() {
            if person.plans.is_empty() {
                return Err(PopulationError::MalformedPlan {
                    person: person.id.clone(),
                    reason: "person has no plan".to_string(),
                });
            }
            for plan in &person.plans {
                plan.validate(&person.id)?;
            }
        }
        Ok(())
    }

    /// Origin and destination coordinates of every selected-plan leg using `mode`.
    pub fn demand_coordinates(&self, mode: &Mode) -> Vec<Coord> {
        self.persons
            .values()
            .filter_map(Person::selected_plan)
            .flat_map(|plan| plan.trips())
            .filter(|(_, leg, _)| &leg.mode == mode)
            .flat_map(|(origin, _, destination)| [origin.coord, destination.coord])
            .collect()
    }

    /// Origin links of every selected-plan leg using `mode`.
    pub fn origin_links(&self, mode: &Mode) -> Vec<&LinkId> {
        self.persons
            .values()
            .filter_map(Person::selected_plan)
            .flat_map(|plan| plan.trips())
            .filter(|(_, leg, _)| &leg.mode == mode)
            .map(|(origin, _, _)| &origin.link)
            .collect()
    }
}
