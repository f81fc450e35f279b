//! Static registry describing every entity the dashboard lists.
//!
//! Table and column identifiers used in generated SQL come only from here,
//! never from request parameters.

use crate::stats::StatSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    /// ISO `YYYY-MM-DD`, stored as TEXT so range comparisons stay lexicographic.
    Date,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Equals,
    Contains,
    NumberRange,
    DateRange,
}

impl FilterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::Equals => "equals",
            FilterKind::Contains => "contains",
            FilterKind::NumberRange => "numberRange",
            FilterKind::DateRange => "dateRange",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterSpec {
    pub field: &'static str,
    pub kind: FilterKind,
}

#[derive(Debug, Clone, Copy)]
pub enum RelationKind {
    /// `base.foreign_key` points at `table.id`.
    BelongsTo { foreign_key: &'static str },
    /// Rows of `table` linked through a join table.
    HasMany {
        through: &'static str,
        local_key: &'static str,
        remote_key: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RelationSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub kind: RelationKind,
    /// Columns embedded in each row; always includes `id`.
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub enum SearchField {
    Own(&'static str),
    Related {
        relation: &'static str,
        column: &'static str,
    },
}

/// Child rows that must not be orphaned by a delete.
#[derive(Debug, Clone, Copy)]
pub struct DependentSpec {
    pub table: &'static str,
    pub foreign_key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub enum ExportSource {
    Own(&'static str),
    Related {
        relation: &'static str,
        column: &'static str,
    },
    RelatedCount(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct ExportColumn {
    pub label: &'static str,
    pub source: ExportSource,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub column: &'static str,
    pub descending: bool,
}

#[derive(Debug)]
pub struct EntitySpec {
    pub name: &'static str,
    pub label: &'static str,
    pub table: &'static str,
    pub primary_key: &'static str,
    pub fields: &'static [FieldSpec],
    pub filters: &'static [FilterSpec],
    pub search: &'static [SearchField],
    pub relations: &'static [RelationSpec],
    pub dependents: &'static [DependentSpec],
    pub order_by: OrderBy,
    pub stats: &'static [StatSpec],
    pub export: &'static [ExportColumn],
}

impl EntitySpec {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn filter(&self, name: &str) -> Option<&'static FilterSpec> {
        self.filters.iter().find(|f| f.field == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Column type including the primary key, which is not listed in `fields`.
    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        if name == self.primary_key {
            return Some(FieldType::Integer);
        }
        self.field(name).map(|f| f.ty)
    }
}

pub const ACTIVE: &str = "Ativo";

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        ty: FieldType::Text,
        required: false,
    }
}

const fn required(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: true,
    }
}

const fn field(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: false,
    }
}

const fn filter(field: &'static str, kind: FilterKind) -> FilterSpec {
    FilterSpec { field, kind }
}

const fn own(label: &'static str, column: &'static str) -> ExportColumn {
    ExportColumn {
        label,
        source: ExportSource::Own(column),
    }
}

const fn related(label: &'static str, relation: &'static str, column: &'static str) -> ExportColumn {
    ExportColumn {
        label,
        source: ExportSource::Related { relation, column },
    }
}

const fn by_name() -> OrderBy {
    OrderBy {
        column: "name",
        descending: false,
    }
}

const SCHOOL: RelationSpec = RelationSpec {
    name: "school",
    table: "schools",
    kind: RelationKind::BelongsTo {
        foreign_key: "school_id",
    },
    columns: &["id", "name", "city"],
};

const FAMILY: RelationSpec = RelationSpec {
    name: "family",
    table: "families",
    kind: RelationKind::BelongsTo {
        foreign_key: "family_id",
    },
    columns: &["id", "name", "phone"],
};

const STUDENT: RelationSpec = RelationSpec {
    name: "student",
    table: "students",
    kind: RelationKind::BelongsTo {
        foreign_key: "student_id",
    },
    columns: &["id", "name", "grade"],
};

const SUBJECT: RelationSpec = RelationSpec {
    name: "subject",
    table: "subjects",
    kind: RelationKind::BelongsTo {
        foreign_key: "subject_id",
    },
    columns: &["id", "name", "code"],
};

const PROFESSIONAL: RelationSpec = RelationSpec {
    name: "professional",
    table: "professionals",
    kind: RelationKind::BelongsTo {
        foreign_key: "professional_id",
    },
    columns: &["id", "name", "specialty"],
};

const ENROLLED_STUDENTS: RelationSpec = RelationSpec {
    name: "students",
    table: "students",
    kind: RelationKind::HasMany {
        through: "class_enrollments",
        local_key: "class_id",
        remote_key: "student_id",
    },
    columns: &["id", "name", "status"],
};

pub static STUDENTS: EntitySpec = EntitySpec {
    name: "students",
    label: "Alunos",
    table: "students",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        text("email"),
        text("grade"),
        required("status", FieldType::Text),
        field("birth_date", FieldType::Date),
        field("school_id", FieldType::Integer),
        field("family_id", FieldType::Integer),
        field("enrolled_at", FieldType::Date),
    ],
    filters: &[
        filter("status", FilterKind::Equals),
        filter("grade", FilterKind::Equals),
        filter("school_id", FilterKind::Equals),
        filter("family_id", FilterKind::Equals),
        filter("enrolled_at", FilterKind::DateRange),
    ],
    search: &[
        SearchField::Own("name"),
        SearchField::Own("email"),
        SearchField::Related {
            relation: "school",
            column: "name",
        },
        SearchField::Related {
            relation: "family",
            column: "name",
        },
    ],
    relations: &[SCHOOL, FAMILY],
    dependents: &[
        DependentSpec {
            table: "evaluations",
            foreign_key: "student_id",
            label: "evaluations",
        },
        DependentSpec {
            table: "class_enrollments",
            foreign_key: "student_id",
            label: "class enrollments",
        },
    ],
    order_by: by_name(),
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "active",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::CountWhere {
            key: "inactive",
            field: "status",
            equals: "Inativo",
        },
        StatSpec::Percentage {
            key: "activePercent",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::DistinctValues {
            key: "schools",
            field: "school_id",
        },
        StatSpec::Distribution {
            key: "byGrade",
            field: "grade",
        },
    ],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        own("E-mail", "email"),
        own("Série", "grade"),
        own("Status", "status"),
        own("Nascimento", "birth_date"),
        related("Escola", "school", "name"),
        related("Família", "family", "name"),
        own("Matrícula", "enrolled_at"),
    ],
};

pub static EVALUATIONS: EntitySpec = EntitySpec {
    name: "evaluations",
    label: "Avaliações",
    table: "evaluations",
    primary_key: "id",
    fields: &[
        required("student_id", FieldType::Integer),
        required("subject_id", FieldType::Integer),
        field("professional_id", FieldType::Integer),
        required("kind", FieldType::Text),
        field("score", FieldType::Real),
        field("max_score", FieldType::Real),
        required("evaluated_at", FieldType::Date),
        required("status", FieldType::Text),
    ],
    filters: &[
        filter("status", FilterKind::Equals),
        filter("kind", FilterKind::Equals),
        filter("student_id", FilterKind::Equals),
        filter("subject_id", FilterKind::Equals),
        filter("professional_id", FilterKind::Equals),
        filter("score", FilterKind::NumberRange),
        filter("evaluated_at", FilterKind::DateRange),
    ],
    search: &[
        SearchField::Own("kind"),
        SearchField::Related {
            relation: "student",
            column: "name",
        },
        SearchField::Related {
            relation: "subject",
            column: "name",
        },
        SearchField::Related {
            relation: "professional",
            column: "name",
        },
    ],
    relations: &[STUDENT, SUBJECT, PROFESSIONAL],
    dependents: &[],
    order_by: OrderBy {
        column: "id",
        descending: false,
    },
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "graded",
            field: "status",
            equals: "Corrigida",
        },
        StatSpec::CountWhere {
            key: "pending",
            field: "status",
            equals: "Pendente",
        },
        StatSpec::CountAtLeast {
            key: "passing",
            field: "score",
            threshold: 6.0,
        },
        StatSpec::Average {
            key: "score",
            field: "score",
        },
        StatSpec::DistinctValues {
            key: "students",
            field: "student_id",
        },
        StatSpec::Distribution {
            key: "byKind",
            field: "kind",
        },
    ],
    export: &[
        own("ID", "id"),
        related("Aluno", "student", "name"),
        related("Disciplina", "subject", "name"),
        related("Profissional", "professional", "name"),
        own("Tipo", "kind"),
        own("Nota", "score"),
        own("Nota máxima", "max_score"),
        own("Data", "evaluated_at"),
        own("Status", "status"),
    ],
};

pub static SUBJECTS: EntitySpec = EntitySpec {
    name: "subjects",
    label: "Disciplinas",
    table: "subjects",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        text("code"),
        text("category"),
        field("workload_hours", FieldType::Integer),
        required("status", FieldType::Text),
    ],
    filters: &[
        filter("status", FilterKind::Equals),
        filter("category", FilterKind::Equals),
        filter("workload_hours", FilterKind::NumberRange),
    ],
    search: &[
        SearchField::Own("name"),
        SearchField::Own("code"),
        SearchField::Own("category"),
    ],
    relations: &[],
    dependents: &[
        DependentSpec {
            table: "classes",
            foreign_key: "subject_id",
            label: "classes",
        },
        DependentSpec {
            table: "evaluations",
            foreign_key: "subject_id",
            label: "evaluations",
        },
    ],
    order_by: by_name(),
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "active",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::Average {
            key: "workloadHours",
            field: "workload_hours",
        },
        StatSpec::Distribution {
            key: "byCategory",
            field: "category",
        },
    ],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        own("Código", "code"),
        own("Categoria", "category"),
        own("Carga horária", "workload_hours"),
        own("Status", "status"),
    ],
};

pub static SCHOOLS: EntitySpec = EntitySpec {
    name: "schools",
    label: "Escolas",
    table: "schools",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        text("city"),
        text("state"),
        text("network"),
        text("phone"),
        required("status", FieldType::Text),
    ],
    filters: &[
        filter("status", FilterKind::Equals),
        filter("network", FilterKind::Equals),
        filter("state", FilterKind::Equals),
        filter("city", FilterKind::Contains),
    ],
    search: &[SearchField::Own("name"), SearchField::Own("city")],
    relations: &[],
    dependents: &[DependentSpec {
        table: "students",
        foreign_key: "school_id",
        label: "students",
    }],
    order_by: by_name(),
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "active",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::DistinctValues {
            key: "cities",
            field: "city",
        },
        StatSpec::Distribution {
            key: "byNetwork",
            field: "network",
        },
    ],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        own("Cidade", "city"),
        own("UF", "state"),
        own("Rede", "network"),
        own("Telefone", "phone"),
        own("Status", "status"),
    ],
};

pub static PROFESSIONALS: EntitySpec = EntitySpec {
    name: "professionals",
    label: "Profissionais",
    table: "professionals",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        text("email"),
        text("phone"),
        text("specialty"),
        required("status", FieldType::Text),
        field("rating", FieldType::Real),
        field("hired_at", FieldType::Date),
    ],
    filters: &[
        filter("status", FilterKind::Equals),
        filter("specialty", FilterKind::Equals),
        filter("rating", FilterKind::NumberRange),
        filter("hired_at", FilterKind::DateRange),
    ],
    search: &[
        SearchField::Own("name"),
        SearchField::Own("email"),
        SearchField::Own("specialty"),
    ],
    relations: &[],
    dependents: &[
        DependentSpec {
            table: "classes",
            foreign_key: "professional_id",
            label: "classes",
        },
        DependentSpec {
            table: "evaluations",
            foreign_key: "professional_id",
            label: "evaluations",
        },
    ],
    order_by: by_name(),
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "active",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::Average {
            key: "rating",
            field: "rating",
        },
        StatSpec::Distribution {
            key: "bySpecialty",
            field: "specialty",
        },
    ],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        own("E-mail", "email"),
        own("Telefone", "phone"),
        own("Especialidade", "specialty"),
        own("Avaliação", "rating"),
        own("Contratação", "hired_at"),
        own("Status", "status"),
    ],
};

pub static CLASSES: EntitySpec = EntitySpec {
    name: "classes",
    label: "Turmas",
    table: "classes",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        field("professional_id", FieldType::Integer),
        field("subject_id", FieldType::Integer),
        text("shift"),
        field("capacity", FieldType::Integer),
        required("status", FieldType::Text),
        field("starts_at", FieldType::Date),
    ],
    filters: &[
        filter("status", FilterKind::Equals),
        filter("shift", FilterKind::Equals),
        filter("professional_id", FilterKind::Equals),
        filter("subject_id", FilterKind::Equals),
        filter("starts_at", FilterKind::DateRange),
    ],
    search: &[
        SearchField::Own("name"),
        SearchField::Related {
            relation: "professional",
            column: "name",
        },
        SearchField::Related {
            relation: "subject",
            column: "name",
        },
        SearchField::Related {
            relation: "students",
            column: "name",
        },
    ],
    relations: &[PROFESSIONAL, SUBJECT, ENROLLED_STUDENTS],
    dependents: &[DependentSpec {
        table: "class_enrollments",
        foreign_key: "class_id",
        label: "enrolled students",
    }],
    order_by: by_name(),
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "active",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::SumRelationLen {
            key: "enrolledStudents",
            relation: "students",
        },
        StatSpec::Average {
            key: "capacity",
            field: "capacity",
        },
        StatSpec::DistinctValues {
            key: "professionals",
            field: "professional_id",
        },
        StatSpec::Distribution {
            key: "byShift",
            field: "shift",
        },
    ],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        related("Profissional", "professional", "name"),
        related("Disciplina", "subject", "name"),
        own("Turno", "shift"),
        own("Capacidade", "capacity"),
        ExportColumn {
            label: "Alunos",
            source: ExportSource::RelatedCount("students"),
        },
        own("Início", "starts_at"),
        own("Status", "status"),
    ],
};

pub static USERS: EntitySpec = EntitySpec {
    name: "users",
    label: "Usuários",
    table: "users",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        required("email", FieldType::Text),
        required("role", FieldType::Text),
        required("status", FieldType::Text),
        field("last_login_at", FieldType::Date),
    ],
    filters: &[
        filter("role", FilterKind::Equals),
        filter("status", FilterKind::Equals),
        filter("last_login_at", FilterKind::DateRange),
    ],
    search: &[SearchField::Own("name"), SearchField::Own("email")],
    relations: &[],
    dependents: &[],
    order_by: by_name(),
    stats: &[
        StatSpec::Count { key: "total" },
        StatSpec::CountWhere {
            key: "active",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::Percentage {
            key: "activePercent",
            field: "status",
            equals: ACTIVE,
        },
        StatSpec::Distribution {
            key: "byRole",
            field: "role",
        },
    ],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        own("E-mail", "email"),
        own("Perfil", "role"),
        own("Status", "status"),
        own("Último acesso", "last_login_at"),
    ],
};

pub static FAMILIES: EntitySpec = EntitySpec {
    name: "families",
    label: "Famílias",
    table: "families",
    primary_key: "id",
    fields: &[
        required("name", FieldType::Text),
        text("phone"),
        text("email"),
    ],
    filters: &[],
    search: &[
        SearchField::Own("name"),
        SearchField::Own("email"),
        SearchField::Own("phone"),
    ],
    relations: &[],
    dependents: &[DependentSpec {
        table: "students",
        foreign_key: "family_id",
        label: "students",
    }],
    order_by: by_name(),
    stats: &[StatSpec::Count { key: "total" }],
    export: &[
        own("ID", "id"),
        own("Nome", "name"),
        own("Telefone", "phone"),
        own("E-mail", "email"),
    ],
};

pub static ALL: &[&EntitySpec] = &[
    &STUDENTS,
    &EVALUATIONS,
    &SUBJECTS,
    &SCHOOLS,
    &PROFESSIONALS,
    &CLASSES,
    &USERS,
    &FAMILIES,
];

pub fn lookup(name: &str) -> Option<&'static EntitySpec> {
    ALL.iter().copied().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_reference_resolves() {
        for spec in ALL {
            for f in spec.filters {
                assert!(
                    spec.field(f.field).is_some(),
                    "{}: filter on unknown field {}",
                    spec.name,
                    f.field
                );
            }
            for s in spec.search {
                match *s {
                    SearchField::Own(col) => assert!(spec.field(col).is_some()),
                    SearchField::Related { relation, column } => {
                        let rel = spec.relation(relation).expect("relation");
                        assert!(rel.columns.contains(&column));
                    }
                }
            }
            for rel in spec.relations {
                assert_eq!(rel.columns.first(), Some(&"id"));
                if let RelationKind::BelongsTo { foreign_key } = rel.kind {
                    assert!(spec.field(foreign_key).is_some());
                }
            }
            for col in spec.export {
                match col.source {
                    ExportSource::Own(c) => assert!(spec.column_type(c).is_some()),
                    ExportSource::Related { relation, column } => {
                        assert!(spec.relation(relation).expect("relation").columns.contains(&column));
                    }
                    ExportSource::RelatedCount(relation) => {
                        assert!(spec.relation(relation).is_some())
                    }
                }
            }
            assert!(spec.column_type(spec.order_by.column).is_some());
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(lookup("classes").map(|s| s.table), Some("classes"));
        assert!(lookup("turmas").is_none());
    }
}
