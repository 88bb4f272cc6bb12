use super::pareto::ParetoFront;
use super::{Optimizer, OptimizerError, TrialReport};
use crate::core::models::objective::Direction;
use crate::core::models::parameter::Assignment;
use std::collections::VecDeque;

/// Replays a fixed list of points in order, e.g. a scan prepared by hand.
pub struct ExplicitPoints {
    pending: VecDeque<Assignment>,
    front: ParetoFront,
}

impl ExplicitPoints {
    pub fn new(points: Vec<Assignment>, objectives: Vec<(String, Direction)>) -> Self {
        Self {
            pending: points.into(),
            front: ParetoFront::new(objectives),
        }
    }
}

impl Optimizer for ExplicitPoints {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn propose(&mut self, n: usize) -> Result<Vec<Assignment>, OptimizerError> {
        let take = n.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    fn report(&mut self, report: &TrialReport) {
        if let TrialReport::Completed {
            id,
            assignment,
            result,
        } = report
        {
            self.front.insert(*id, assignment.clone(), result.clone());
        }
    }

    fn is_converged(&self) -> bool {
        false
    }

    fn front(&self) -> &ParetoFront {
        &self.front
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::parameter::ParameterValue;

    fn point(v: i64) -> Assignment {
        Assignment::from([("enable_staves_2".to_string(), ParameterValue::Int(v))])
    }

    #[test]
    fn points_are_handed_out_in_order_until_empty() {
        let mut optimizer = ExplicitPoints::new(vec![point(0), point(1), point(0)], vec![]);
        assert_eq!(optimizer.propose(2).unwrap(), vec![point(0), point(1)]);
        assert_eq!(optimizer.propose(2).unwrap(), vec![point(0)]);
        assert!(optimizer.propose(2).unwrap().is_empty());
    }
}
