/// Body-composition estimation from weight and bioimpedance readings
///
/// Vendor regression formulas for the scale's two-frequency bioimpedance
/// measurement. Callers must not pass a zero 50 kHz impedance; frames with an
/// invalid bioimpedance reading are handled before these functions run.
use crate::models::User;

/// Estimated body fat percentage from weight and 50 kHz impedance.
pub fn calculate_fat(user: &User, weight_kg: f32, imp50: f32) -> f32 {
    let age = user.age as f32;
    let height = user.height_cm as f32;

    let activity_corr = match (user.activity_level, user.is_male()) {
        (4, true) => 2.5,
        (4, false) => 2.3,
        (5, true) => 4.3,
        (5, false) => 4.1,
        _ => 0.0,
    };
    let sex_corr = if user.is_male() { 0.250 } else { 0.214 };
    let sex_div = if user.is_male() { 65.5 } else { 55.1 };

    1.847 * weight_kg * 10000.0 / (height * height) + sex_corr * age + 0.062 * imp50
        - (sex_div - activity_corr)
}

/// Estimated body water percentage from weight and 50 kHz impedance.
pub fn calculate_water(user: &User, weight_kg: f32, imp50: f32) -> f32 {
    let age = user.age as f32;
    let height = user.height_cm as f32;

    let activity_corr = match (user.activity_level, user.is_male()) {
        (1..=3, true) => 2.83,
        (4, true) => 3.93,
        (4, false) => 0.4,
        (5, true) => 5.33,
        (5, false) => 1.4,
        _ => 0.0,
    };

    (0.3674 * height * height / imp50 + 0.17530 * weight_kg - 0.11 * age
        + (6.53 + activity_corr))
        / weight_kg
        * 100.0
}

/// Estimated muscle percentage; the only metric that uses both impedance
/// frequencies.
pub fn calculate_muscle(user: &User, weight_kg: f32, imp50: f32, imp5: f32) -> f32 {
    let age = user.age as f32;
    let height = user.height_cm as f32;

    let activity_corr = match (user.activity_level, user.is_male()) {
        (1..=3, true) => 3.6224,
        (4, true) => 4.3904,
        (5, true) => 5.4144,
        (5, false) => 1.664,
        _ => 0.0,
    };

    ((0.47027 / imp50 - 0.24196 / imp5) * height * height + 0.13796 * weight_kg - 0.1152 * age
        + (5.12 + activity_corr))
        / weight_kg
        * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sex;

    fn reference_user() -> User {
        User {
            participant_id: 1,
            age: 50,
            height_cm: 159,
            sex: Sex::Female,
            activity_level: 2,
        }
    }

    #[test]
    fn fat_matches_reference_figures() {
        let fat = calculate_fat(&reference_user(), 60.0, 500.0);
        assert!((fat - 30.4).abs() < 0.5, "fat = {}", fat);
    }

    #[test]
    fn water_matches_reference_figures() {
        let water = calculate_water(&reference_user(), 60.0, 500.0);
        assert!((water - 50.2).abs() < 0.5, "water = {}", water);
    }

    #[test]
    fn muscle_matches_reference_figures() {
        let muscle = calculate_muscle(&reference_user(), 60.0, 500.0, 600.0);
        assert!((muscle - 35.4).abs() < 0.5, "muscle = {}", muscle);
    }

    #[test]
    fn activity_level_raises_fat_correction() {
        let sedentary = reference_user();
        let mut athlete = reference_user();
        athlete.activity_level = 5;

        let base = calculate_fat(&sedentary, 60.0, 500.0);
        let corrected = calculate_fat(&athlete, 60.0, 500.0);
        assert!((corrected - base - 4.1).abs() < 1e-3);
    }

    #[test]
    fn water_correction_differs_by_sex() {
        let female = reference_user();
        let mut male = reference_user();
        male.sex = Sex::Male;

        // at activity levels 1-3 only the male correction applies
        let diff = calculate_water(&male, 60.0, 500.0) - calculate_water(&female, 60.0, 500.0);
        assert!((diff - 2.83 / 60.0 * 100.0).abs() < 1e-3);
    }
}
