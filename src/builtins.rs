//! Macros every new context starts with.

use crate::macros::MacroTable;

/// `LIST TABLES [FOR ALL | FOR SCHEMA name]` against the Db2 catalog.
pub const LIST: &str = r#"
#
# LIST TABLES lists the tables owned by the current user or a schema
#
var syntax Syntax: LIST TABLES [FOR ALL | FOR SCHEMA name]
flags -a
if {^1} <> 'TABLES'
    exit {syntax}
endif

WITH TYPES(TYPE,DESCRIPTION) AS (
  VALUES
    ('A','Alias'),
    ('G','Created temporary table'),
    ('H','Hierarchy table'),
    ('L','Detached table'),
    ('N','Nickname'),
    ('S','Materialized query table'),
    ('T','Table'),
    ('U','Typed table'),
    ('V','View'),
    ('W','Typed view')
)
SELECT TABNAME, TABSCHEMA, T.DESCRIPTION FROM SYSCAT.TABLES S, TYPES T
       WHERE T.TYPE = S.TYPE

# LIST TABLES
if {argc} == 1
   AND OWNER = CURRENT USER
   ORDER BY TABNAME, TABSCHEMA
   return
endif

# LIST TABLES FOR ALL
if {argc} == 3
    if {^2}&{^3} == 'FOR&ALL'
        ORDER BY TABNAME, TABSCHEMA
        return
    endif
    exit {syntax}
endif

# LIST TABLES FOR SCHEMA name
if {argc} == 4
    if {^2}&{^3} == 'FOR&SCHEMA'
        AND TABSCHEMA = '{^4}'
        ORDER BY TABNAME, TABSCHEMA
        return
    else
        exit {syntax}
    endif
endif

exit {syntax}
"#;

/// `DESCRIBE TABLE name` / `DESCRIBE SELECT …` through `ADMIN_CMD`.
pub const DESCRIBE: &str = r#"
var syntax Syntax: DESCRIBE [TABLE name | SELECT statement]
flags -a
if {argc} < 2
   exit {syntax}
endif

CALL ADMIN_CMD('{*0}');
"#;

/// `SET DISPLAY|THREADS|MAXROWS|MAXGRID value` becomes an `OPTION`; any
/// other `SET` is passed on as SQL.
pub const SET: &str = r#"
if {^1} == 'DISPLAY'
    if {^2} == "TABLE"
        OPTION DISPLAY TABLE
        return
    else
        if {^2} == "JSON"
            OPTION DISPLAY JSON
            return
        endif
    endif
endif

if {^1} == 'THREADS'
    OPTION THREADS {2}
    return
endif

if {^1} == 'MAXROWS'
    OPTION MAXROWS {2}
    return
endif

if {^1} == 'MAXGRID'
    OPTION MAXGRID {2}
    return
endif

{*0}
return
"#;

/// Register `LIST`, `DESCRIBE` and `SET`.
pub fn register(table: &mut MacroTable) {
    table.define("LIST", LIST);
    table.define("DESCRIBE", DESCRIBE);
    table.define("SET", SET);
}

/// A macro table holding only the built-ins.
pub fn table() -> MacroTable {
    let mut table = MacroTable::new();
    register(&mut table);
    table
}
