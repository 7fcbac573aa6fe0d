//! Resource dimensions and vector arithmetic shared by the engine and policies.
//!
//! The cluster model tracks exactly two dimensions, CPU and memory. Keeping the
//! set closed lets the rest of the crate iterate over [`Resource::ALL`] instead
//! of branching on specific labels, and keeps every vector a fixed-size array
//! with no heap allocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Sub, SubAssign};

/// Resource dimensions tracked by the capacity model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    /// Ordered list of all dimensions for iteration utilities.
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Memory];

    /// Stable index for resource-indexed arrays.
    pub const fn index(self) -> usize {
        match self {
            Resource::Cpu => 0,
            Resource::Memory => 1,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        };
        write!(f, "{label}")
    }
}

/// Fixed-dimension vector of resource quantities, one component per [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    values: [f64; 2],
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector { values: [0.0; 2] };

    pub const fn new(cpu: f64, memory: f64) -> Self {
        ResourceVector {
            values: [cpu, memory],
        }
    }

    /// Build a vector by executing a closure for each resource dimension.
    pub fn from_fn(mut f: impl FnMut(Resource) -> f64) -> Self {
        let mut values = [0.0; 2];
        for resource in Resource::ALL {
            values[resource.index()] = f(resource);
        }
        ResourceVector { values }
    }

    pub fn get(&self, resource: Resource) -> f64 {
        self.values[resource.index()]
    }

    /// Componentwise `<=` against `other`.
    pub fn fits_within(&self, other: &ResourceVector) -> bool {
        Resource::ALL
            .iter()
            .all(|&r| self.get(r) <= other.get(r))
    }

    /// Largest componentwise quotient `self[r] / denominator[r]`.
    ///
    /// Callers are expected to pass strictly positive denominators (system
    /// capacities, weights); quotients against zero are the caller's problem
    /// and propagate as infinities or NaN.
    pub fn max_ratio(&self, denominator: &ResourceVector) -> f64 {
        let mut max = f64::NEG_INFINITY;
        for resource in Resource::ALL {
            let ratio = self.get(resource) / denominator.get(resource);
            if ratio > max {
                max = ratio;
            }
        }
        max
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// Componentwise multiplication by a scalar.
    pub fn scale(&self, factor: f64) -> ResourceVector {
        ResourceVector::from_fn(|r| self.get(r) * factor)
    }

    /// Componentwise maximum of two vectors.
    pub fn max(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector::from_fn(|r| self.get(r).max(other.get(r)))
    }
}

impl Index<Resource> for ResourceVector {
    type Output = f64;

    fn index(&self, index: Resource) -> &Self::Output {
        &self.values[index.index()]
    }
}

impl IndexMut<Resource> for ResourceVector {
    fn index_mut(&mut self, index: Resource) -> &mut Self::Output {
        &mut self.values[index.index()]
    }
}

impl Add for ResourceVector {
    type Output = ResourceVector;

    fn add(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector::from_fn(|r| self.get(r) + rhs.get(r))
    }
}

impl Sub for ResourceVector {
    type Output = ResourceVector;

    fn sub(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector::from_fn(|r| self.get(r) - rhs.get(r))
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, rhs: ResourceVector) {
        for resource in Resource::ALL {
            self.values[resource.index()] += rhs.get(resource);
        }
    }
}

impl SubAssign for ResourceVector {
    fn sub_assign(&mut self, rhs: ResourceVector) {
        for resource in Resource::ALL {
            self.values[resource.index()] -= rhs.get(resource);
        }
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(cpu={}, memory={})",
            self.get(Resource::Cpu),
            self.get(Resource::Memory)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_index_is_stable() {
        assert_eq!(Resource::Cpu.index(), 0);
        assert_eq!(Resource::Memory.index(), 1);
    }

    #[test]
    fn componentwise_arithmetic() {
        let mut v = ResourceVector::new(2.0, 3.0);
        v += ResourceVector::new(1.0, 1.0);
        assert_eq!(v, ResourceVector::new(3.0, 4.0));
        v -= ResourceVector::new(3.0, 4.0);
        assert!(v.is_zero());
    }

    #[test]
    fn fits_within_is_componentwise() {
        let demand = ResourceVector::new(2.0, 8.0);
        assert!(demand.fits_within(&ResourceVector::new(2.0, 8.0)));
        assert!(!demand.fits_within(&ResourceVector::new(4.0, 7.9)));
    }

    #[test]
    fn max_ratio_picks_dominant_dimension() {
        let alloc = ResourceVector::new(2.0, 8.0);
        let capacity = ResourceVector::new(10.0, 10.0);
        assert_eq!(alloc.max_ratio(&capacity), 0.8);
    }
}
