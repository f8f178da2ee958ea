use std::collections::HashMap;

/// Many-to-many descriptor: pivot table plus the four key columns.
#[derive(Debug, Clone)]
pub struct BelongsToManyDef {
    pub related: String,
    pub pivot_table: String,
    /// Pivot column referencing the parent (`user_id`).
    pub foreign_pivot_key: String,
    /// Pivot column referencing the related class (`role_id`).
    pub related_pivot_key: String,
    /// Parent column matched against `foreign_pivot_key`.
    pub parent_key: String,
    /// Related column matched against `related_pivot_key`.
    pub related_key: String,
    /// Extra pivot columns to project alongside the two keys.
    pub pivot_columns: Vec<String>,
}

/// One relation declared on a model class.
///
/// Related classes are referenced by registry name, not by pointer, so
/// mutually related classes don't form reference cycles.
#[derive(Debug, Clone)]
pub enum RelationDef {
    HasOne {
        related: String,
        foreign_key: String,
        local_key: String,
    },
    HasMany {
        related: String,
        foreign_key: String,
        local_key: String,
    },
    BelongsTo {
        related: String,
        foreign_key: String,
        owner_key: String,
    },
    BelongsToMany(BelongsToManyDef),
    MorphOne {
        related: String,
        /// `<name>_type` column on the related table.
        morph_type: String,
        /// `<name>_id` column on the related table.
        morph_id: String,
        local_key: String,
    },
    MorphMany {
        related: String,
        morph_type: String,
        morph_id: String,
        local_key: String,
    },
    MorphTo {
        morph_type: String,
        morph_id: String,
        owner_key: String,
        /// Tag → registered class name. Inversion of the tag stored in the
        /// type column; required, there is no runtime type inspection.
        morph_map: HashMap<String, String>,
    },
}

impl RelationDef {
    /// Whether eager loading attaches a single record or a list.
    pub fn is_to_one(&self) -> bool {
        matches!(
            self,
            RelationDef::HasOne { .. }
                | RelationDef::BelongsTo { .. }
                | RelationDef::MorphOne { .. }
                | RelationDef::MorphTo { .. }
        )
    }
}
