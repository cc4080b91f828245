//! Derived names for the auxiliary resources attached to an instance.
//!
//! There is no side table linking an instance to its volume, firewall rule
//! and SSH key registration; teardown recomputes these names from the
//! instance name alone, so every backend must create and delete auxiliary
//! resources under exactly these names.

/// Names of the auxiliary resources belonging to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxNames {
    pub volume: String,
    pub firewall: String,
    pub ssh_key: String,
}

/// Derive the auxiliary resource names for an instance name.
pub fn aux_names(instance: &str) -> AuxNames {
    AuxNames {
        volume: format!("{instance}-vol"),
        firewall: format!("{instance}-fw"),
        ssh_key: format!("{instance}-ssh"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_instance_name_alone() {
        let names = aux_names("srv1");
        assert_eq!(names.volume, "srv1-vol");
        assert_eq!(names.firewall, "srv1-fw");
        assert_eq!(names.ssh_key, "srv1-ssh");
    }
}
