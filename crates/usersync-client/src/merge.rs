//! Pending-mutation merge.
//!
//! Last write wins per field; fields the new change does not touch keep
//! whatever the queued mutation already had. No cross-field validation.

use usersync_types::{UserField, UserId, UserPatch};

/// Fold `field` into the mutation already queued for `id`.
///
/// A missing mutation, or one that belongs to a different user, is replaced
/// by a fresh patch holding only `field`.
pub fn merge(existing: Option<UserPatch>, id: &UserId, field: UserField) -> UserPatch {
    let base = match existing {
        Some(patch) if patch.id == *id => patch,
        _ => UserPatch::new(id.clone()),
    };
    base.with(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use usersync_types::Patch;

    fn u1() -> UserId {
        UserId::new("u1")
    }

    #[test]
    fn first_change_starts_a_new_patch() {
        let patch = merge(None, &u1(), UserField::IsPremium(true));
        assert_eq!(patch.id, u1());
        assert_eq!(patch.fields(), vec![UserField::IsPremium(true)]);
    }

    #[test]
    fn foreign_patch_is_discarded() {
        let stale = UserPatch::new(UserId::new("u2")).with(UserField::Locale(Some("en".into())));
        let patch = merge(Some(stale), &u1(), UserField::IsPremium(true));
        assert_eq!(patch.id, u1());
        assert_eq!(patch.locale, Patch::Unset);
    }

    #[test]
    fn distinct_fields_union_regardless_of_order() {
        let changes = [
            UserField::IsPremium(true),
            UserField::DisplayName(Some("Amy".into())),
            UserField::Locale(None),
        ];

        let forward = changes
            .iter()
            .cloned()
            .fold(None, |acc, f| Some(merge(acc, &u1(), f)))
            .unwrap();
        let backward = changes
            .iter()
            .rev()
            .cloned()
            .fold(None, |acc, f| Some(merge(acc, &u1(), f)))
            .unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.fields().len(), 3);
        assert_eq!(forward.locale, Patch::Set(None));
    }

    #[test]
    fn most_recent_value_per_field_wins() {
        let mut patch = None;
        for field in [
            UserField::IsPremium(true),
            UserField::Locale(Some("en".into())),
            UserField::IsPremium(false),
        ] {
            patch = Some(merge(patch, &u1(), field));
        }
        let patch = patch.unwrap();
        assert_eq!(patch.is_premium, Patch::Set(false));
        assert_eq!(patch.locale, Patch::Set(Some("en".into())));
    }
}
