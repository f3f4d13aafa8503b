//! SeaORM entity models used by the relational storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `prediction_sessions`: one row per inference run
//! - `detection_objects`: one row per bounding box, joined on `prediction_uid`

use sea_orm::entity::prelude::*;

/// Prediction sessions table entity model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "prediction_sessions")]
pub struct Model {
    /// Caller-generated uid
    #[sea_orm(primary_key, auto_increment = false)]
    pub uid: String,
    /// Filled by the `CURRENT_TIMESTAMP` column default
    pub timestamp: String,
    pub original_image: String,
    pub predicted_image: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "detection_objects::Entity")]
    DetectionObjects,
}

impl Related<detection_objects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DetectionObjects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Detection objects table entity models.
pub mod detection_objects {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "detection_objects")]
    pub struct Model {
        /// Auto-increment row id
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Foreign key to `prediction_sessions.uid`
        pub prediction_uid: String,
        pub label: String,
        pub score: f64,
        /// JSON array `[x1, y1, x2, y2]`
        #[sea_orm(column_name = "box")]
        pub bbox: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a prediction session
        #[sea_orm(
            belongs_to = "super::Entity",
            from = "Column::PredictionUid",
            to = "super::Column::Uid"
        )]
        Session,
    }

    impl Related<super::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Session.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
