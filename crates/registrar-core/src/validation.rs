//! Field-level validators for a registration request (spec.md §6).
//!
//! Every check here is pure and synchronous: no DB lookups (those live in
//! `CredentialStore`, which is the only thing that can say whether an email
//! or team code is actually taken) and no network calls. Collects every
//! violation it finds rather than stopping at the first, so the caller can
//! report them all at once.

use crate::{CoreError, FieldViolation, MemberInput, RegistrationRequest};

const MAX_TEAM_MEMBERS: usize = 50;

fn check_len(field: &str, value: &str, min: usize, max: usize, out: &mut Vec<FieldViolation>) {
    let len = value.trim().chars().count();
    if len < min || len > max {
        out.push(FieldViolation::new(
            field,
            format!("must be between {min} and {max} characters"),
        ));
    }
}

/// Deliberately permissive: one `@`, a non-empty local part, a domain part
/// containing at least one `.` with non-empty labels either side of it.
/// Real deliverability is the mailer's problem, not the form's.
fn is_plausible_email(value: &str) -> bool {
    let Some((local, domain)) = value.trim().split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    let Some((label, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !label.is_empty() && tld.len() >= 2
}

fn check_email(field: &str, value: &str, out: &mut Vec<FieldViolation>) {
    if !is_plausible_email(value) {
        out.push(FieldViolation::new(field, "not a valid email address"));
    }
}

/// Phone numbers are stored and displayed as given; this only checks that
/// enough digits are present to plausibly be a phone number (spec.md §6:
/// "10-20 digits, punctuation such as spaces/dashes/parentheses permitted").
fn check_phone(field: &str, value: &str, out: &mut Vec<FieldViolation>) {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 10 || digits > 20 {
        out.push(FieldViolation::new(
            field,
            "must contain between 10 and 20 digits",
        ));
    }
}

fn validate_member(index: usize, leader_email: &str, member: &MemberInput, out: &mut Vec<FieldViolation>) {
    let prefix = format!("team_members[{index}]");
    check_len(&format!("{prefix}.name"), &member.name, 2, 100, out);
    check_email(&format!("{prefix}.email"), &member.email, out);
    check_phone(&format!("{prefix}.phone"), &member.phone, out);

    if index == 0 {
        if !member.is_team_leader {
            out.push(FieldViolation::new(
                format!("{prefix}.is_team_leader"),
                "the first team_members entry must be the team leader",
            ));
        }
        if member.email.trim().to_lowercase() != leader_email.trim().to_lowercase() {
            out.push(FieldViolation::new(
                format!("{prefix}.email"),
                "must match leader_email",
            ));
        }
    } else if member.is_team_leader {
        out.push(FieldViolation::new(
            format!("{prefix}.is_team_leader"),
            "only the first team_members entry may be the team leader",
        ));
    }
}

/// Validates a registration request against every static constraint in
/// spec.md §6. Returns every violation found, not just the first.
pub fn validate_registration_request(req: &RegistrationRequest) -> Result<(), CoreError> {
    let mut violations = Vec::new();

    check_len("team_name", &req.team_name, 2, 100, &mut violations);
    check_len("leader_name", &req.leader_name, 2, 100, &mut violations);
    check_email("leader_email", &req.leader_email, &mut violations);
    check_phone("leader_phone", &req.leader_phone, &mut violations);
    check_len("college_name", &req.college_name, 2, 100, &mut violations);
    check_len("year", &req.year, 1, 50, &mut violations);
    check_len("domain", &req.domain, 1, 50, &mut violations);

    if req.team_members.is_empty() || req.team_members.len() > MAX_TEAM_MEMBERS {
        violations.push(FieldViolation::new(
            "team_members",
            format!("must contain between 1 and {MAX_TEAM_MEMBERS} entries"),
        ));
    } else {
        for (i, member) in req.team_members.iter().enumerate() {
            validate_member(i, &req.leader_email, member, &mut violations);
        }
    }

    if !req.terms_accepted {
        violations.push(FieldViolation::new(
            "terms_accepted",
            "must be accepted to register",
        ));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RegistrationRequest {
        RegistrationRequest {
            team_name: "Byte Busters".into(),
            leader_name: "Asha Rao".into(),
            leader_email: "asha@example.com".into(),
            leader_phone: "9876543210".into(),
            college_name: "NIT Trichy".into(),
            year: "3".into(),
            domain: "Web Development".into(),
            team_members: vec![MemberInput {
                name: "Asha Rao".into(),
                email: "asha@example.com".into(),
                phone: "9876543210".into(),
                is_team_leader: true,
            }],
            terms_accepted: true,
        }
    }

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_registration_request(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_missing_terms_acceptance() {
        let mut req = valid_request();
        req.terms_accepted = false;
        let err = validate_registration_request(&req).unwrap_err();
        assert!(err.violations().iter().any(|v| v.field == "terms_accepted"));
    }

    #[test]
    fn rejects_malformed_leader_email() {
        let mut req = valid_request();
        req.leader_email = "not-an-email".into();
        req.team_members[0].email = "not-an-email".into();
        let err = validate_registration_request(&req).unwrap_err();
        assert!(err.violations().iter().any(|v| v.field == "leader_email"));
    }

    #[test]
    fn rejects_leader_email_member_mismatch() {
        let mut req = valid_request();
        req.team_members[0].email = "someone-else@example.com".into();
        let err = validate_registration_request(&req).unwrap_err();
        assert!(err
            .violations()
            .iter()
            .any(|v| v.field == "team_members[0].email"));
    }

    #[test]
    fn rejects_a_second_team_leader() {
        let mut req = valid_request();
        req.team_members.push(MemberInput {
            name: "Second Leader".into(),
            email: "second@example.com".into(),
            phone: "9876543211".into(),
            is_team_leader: true,
        });
        let err = validate_registration_request(&req).unwrap_err();
        assert!(err
            .violations()
            .iter()
            .any(|v| v.field == "team_members[1].is_team_leader"));
    }

    #[test]
    fn rejects_too_many_members() {
        let mut req = valid_request();
        for i in 1..60 {
            req.team_members.push(MemberInput {
                name: format!("Member {i}"),
                email: format!("member{i}@example.com"),
                phone: "9876543210".into(),
                is_team_leader: false,
            });
        }
        let err = validate_registration_request(&req).unwrap_err();
        assert!(err.violations().iter().any(|v| v.field == "team_members"));
    }
}
