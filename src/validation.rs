//! Request payload validation. Rules run before any storage access and
//! collect every failure as a human-readable message.

use crate::model::{CouponDto, CreateCouponDto, Credentials};

const MIN_PASSWORD_LEN: usize = 6;

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<String>>;
}

#[derive(Debug, Default)]
struct Rules {
    errors: Vec<String>,
}

impl Rules {
    fn not_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.errors.push(format!("'{field}' must not be empty."));
        }
        self
    }

    fn inclusive_between(&mut self, field: &str, value: i64, min: i64, max: i64) -> &mut Self {
        if value < min || value > max {
            self.errors.push(format!(
                "'{field}' must be between {min} and {max}. You entered {value}."
            ));
        }
        self
    }

    fn greater_than(&mut self, field: &str, value: i64, bound: i64) -> &mut Self {
        if value <= bound {
            self.errors
                .push(format!("'{field}' must be greater than '{bound}'."));
        }
        self
    }

    fn min_length(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        if value.chars().count() < min {
            self.errors.push(format!(
                "'{field}' must be at least {min} characters."
            ));
        }
        self
    }

    fn finish(&mut self) -> Result<(), Vec<String>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }
}

impl Validate for CreateCouponDto {
    fn validate(&self) -> Result<(), Vec<String>> {
        Rules::default()
            .not_empty("Name", &self.name)
            .inclusive_between("Percent", self.percent.into(), 1, 100)
            .finish()
    }
}

impl Validate for CouponDto {
    fn validate(&self) -> Result<(), Vec<String>> {
        Rules::default()
            .greater_than("Id", self.id, 0)
            .not_empty("Name", &self.name)
            .inclusive_between("Percent", self.percent.into(), 1, 100)
            .finish()
    }
}

impl Validate for Credentials {
    fn validate(&self) -> Result<(), Vec<String>> {
        Rules::default()
            .not_empty("UserName", &self.user_name)
            .min_length("Password", &self.password, MIN_PASSWORD_LEN)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(name: &str, percent: i32) -> CreateCouponDto {
        CreateCouponDto {
            name: name.into(),
            percent,
            is_active: true,
        }
    }

    #[test]
    fn percent_bounds_are_inclusive() {
        assert!(create("A", 1).validate().is_ok());
        assert!(create("A", 100).validate().is_ok());
        for percent in [0, 101, -5, i32::MAX] {
            let errors = create("A", percent).validate().unwrap_err();
            assert_eq!(errors.len(), 1);
            assert!(errors[0].starts_with("'Percent' must be between 1 and 100"));
        }
    }

    #[test]
    fn blank_name_is_rejected() {
        let errors = create("   ", 10).validate().unwrap_err();
        assert_eq!(errors, vec!["'Name' must not be empty.".to_string()]);
    }

    #[test]
    fn update_collects_every_failure() {
        let dto = CouponDto {
            id: 0,
            name: String::new(),
            percent: 150,
            ..Default::default()
        };
        let errors = dto.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], "'Id' must be greater than '0'.");
    }

    #[test]
    fn short_password_is_rejected() {
        let creds = Credentials {
            user_name: "bob".into(),
            password: "abc".into(),
        };
        assert_eq!(creds.validate().unwrap_err().len(), 1);
    }
}
