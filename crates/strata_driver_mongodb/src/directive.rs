use strata_core::{OrmError, OrmResult};

/// Operations the document grammar can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveOp {
    Find,
    Aggregate,
    InsertOne,
    InsertMany,
    UpdateMany,
    DeleteMany,
    CreateCollection,
    CollMod,
    ListCollections,
    RenameCollection,
    ExistsField,
}

impl DirectiveOp {
    fn parse(op: &str) -> OrmResult<Self> {
        match op {
            "find" => Ok(Self::Find),
            "aggregate" => Ok(Self::Aggregate),
            "insertOne" => Ok(Self::InsertOne),
            "insertMany" => Ok(Self::InsertMany),
            "updateMany" => Ok(Self::UpdateMany),
            "deleteMany" => Ok(Self::DeleteMany),
            "createCollection" => Ok(Self::CreateCollection),
            "collMod" => Ok(Self::CollMod),
            "listCollections" => Ok(Self::ListCollections),
            "renameCollection" => Ok(Self::RenameCollection),
            "existsField" => Ok(Self::ExistsField),
            other => Err(OrmError::query_failed(format!(
                "unknown document directive op '{}'",
                other
            ))),
        }
    }
}

/// Parsed `<collection>:<op>:<payload-json>` directive.
#[derive(Debug, Clone)]
pub struct Directive {
    pub collection: String,
    pub op: DirectiveOp,
    pub payload: serde_json::Value,
}

impl Directive {
    pub fn parse(text: &str) -> OrmResult<Self> {
        let mut parts = text.splitn(3, ':');
        let (Some(collection), Some(op), Some(payload)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(OrmError::query_failed(format!(
                "malformed document directive '{}'",
                text
            )));
        };

        if collection.is_empty() {
            return Err(OrmError::query_failed(
                "document directive has no collection",
            ));
        }

        let payload: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
            OrmError::query_failed(format!("document directive payload is not JSON: {}", e))
        })?;

        Ok(Self {
            collection: collection.to_string(),
            op: DirectiveOp::parse(op)?,
            payload,
        })
    }
}
